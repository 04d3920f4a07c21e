//! Training module for CRF models
//!
//! Maximum-likelihood training with an L2 prior: the objective runs the
//! lattice engine over every training instance and the L-BFGS solver drives
//! the weight vector to its optimum.

mod lbfgs;
mod model_writer;
mod objective;
mod trainer;

pub use self::lbfgs::{minimize, LbfgsParams, LineSearchAlgorithm};
pub use self::model_writer::ModelWriter;
pub use self::objective::{regularization, LogLikelihood};
pub use self::trainer::{Trainer, TrainerParams};
