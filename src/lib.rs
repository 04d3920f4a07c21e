//! Linear-chain Conditional Random Fields with template features
//!
//! This library trains linear-chain CRFs by maximizing the L2-regularized
//! conditional log-likelihood with L-BFGS, and tags new sequences with
//! Viterbi decoding. Features come from CRF++-style templates such as
//! `U00:%x[0,0]` (current word, current tag) and `B` (tag bigram).
//!
//! # Examples
//!
//! ## Training
//!
//! ```no_run
//! use lincrf::{Instance, TemplateSet, Trainer};
//!
//! let templates = TemplateSet::parse("U00:%x[0,0]\nU01:%x[-1,0]\nB")?;
//! let mut trainer = Trainer::new(templates).with_sigma(1.0)?;
//! trainer.append(Instance::tagged(&[("the", "D"), ("cat", "N")]))?;
//! trainer.append(Instance::tagged(&[("dogs", "N"), ("bark", "V")]))?;
//!
//! let model = trainer.train()?;
//! model.save("model.lcrf")?;
//! # Ok::<(), std::io::Error>(())
//! ```
//!
//! ## Prediction
//!
//! ```no_run
//! use lincrf::{Model, Token};
//!
//! let model = Model::load("model.lcrf")?;
//! let mut tagger = model.tagger();
//!
//! let tokens = vec![Token::from("the"), Token::from("dogs")];
//! let tags = tagger.tag(&tokens)?;
//! # Ok::<(), std::io::Error>(())
//! ```

mod context;
mod dataset;
mod dictionary;
mod feature;
mod model;
mod tagger;
mod template;
mod vocabulary;

/// Training module containing all components for training CRF models
pub mod train;

// Re-export main types
pub use self::context::{
    Accumulated, Accumulator, Context, Direction, Flag, LogSumExp, MaxProduct,
};
pub use self::dataset::{read_conll, Instance, TaggedToken, Token};
pub use self::dictionary::Dictionary;
pub use self::feature::{
    BatchFeatures, FeatureIndex, InstanceFeatures, TagEntry, TagIndex, ANY_TAG,
};
pub use self::model::Model;
pub use self::tagger::Tagger;
pub use self::template::{FeatureDescriptor, Observation, Template, TemplateKind, TemplateSet};
pub use self::vocabulary::{
    normalize, TagSet, Transitions, Vocabulary, END_TAG, NUMERIC, START_TAG, UNKNOWN_WORD,
};

// Re-export training types for convenience
pub use self::train::{LbfgsParams, LineSearchAlgorithm, Trainer, TrainerParams};
