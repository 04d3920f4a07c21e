use std::io;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use super::lbfgs::{self, LbfgsParams};
use super::objective::LogLikelihood;
use crate::dataset::{Instance, Token};
use crate::feature::FeatureIndex;
use crate::model::Model;
use crate::template::TemplateSet;
use crate::vocabulary::{TagSet, Vocabulary};

/// Training parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainerParams {
    sigma: f64,
    seed: u64,
    init_scale: f64,
    parallel: bool,
    lbfgs: LbfgsParams,
}

impl Default for TrainerParams {
    fn default() -> Self {
        Self {
            sigma: 1.0,
            seed: 0,
            init_scale: 0.01,
            parallel: true,
            lbfgs: LbfgsParams::default(),
        }
    }
}

impl TrainerParams {
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Set the standard deviation of the Gaussian prior on the weights
    pub fn set_sigma(&mut self, sigma: f64) -> io::Result<()> {
        if sigma.is_nan() || sigma <= 0.0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "sigma must be positive",
            ));
        }
        self.sigma = sigma;
        Ok(())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Seed of the random starting point
    pub fn set_seed(&mut self, seed: u64) {
        self.seed = seed;
    }

    pub fn init_scale(&self) -> f64 {
        self.init_scale
    }

    /// Starting weights are drawn uniformly from `[-init_scale, init_scale)`
    pub fn set_init_scale(&mut self, init_scale: f64) -> io::Result<()> {
        if init_scale.is_nan() || init_scale < 0.0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "init_scale must be non-negative",
            ));
        }
        self.init_scale = init_scale;
        Ok(())
    }

    pub fn parallel(&self) -> bool {
        self.parallel
    }

    pub fn set_parallel(&mut self, parallel: bool) {
        self.parallel = parallel;
    }

    pub fn lbfgs(&self) -> &LbfgsParams {
        &self.lbfgs
    }

    pub fn lbfgs_mut(&mut self) -> &mut LbfgsParams {
        &mut self.lbfgs
    }
}

/// CRF Trainer
#[derive(Debug, Clone)]
pub struct Trainer {
    /// Feature templates
    templates: TemplateSet,
    /// Training instances
    instances: Vec<Instance>,
    /// Training parameters
    params: TrainerParams,
}

impl Default for Trainer {
    fn default() -> Self {
        Self::new(TemplateSet::default())
    }
}

impl Trainer {
    /// Create a new trainer
    pub fn new(templates: TemplateSet) -> Self {
        Self {
            templates,
            instances: Vec::new(),
            params: TrainerParams::default(),
        }
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    /// Get training parameters
    pub fn params(&self) -> &TrainerParams {
        &self.params
    }

    /// Get training parameters for mutation
    pub fn params_mut(&mut self) -> &mut TrainerParams {
        &mut self.params
    }

    /// Set the prior standard deviation (builder pattern)
    pub fn with_sigma(mut self, sigma: f64) -> io::Result<Self> {
        self.params.set_sigma(sigma)?;
        Ok(self)
    }

    /// Set the starting point seed (builder pattern)
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.params.set_seed(seed);
        self
    }

    /// Set maximum iterations (builder pattern)
    pub fn with_max_iterations(mut self, max_iterations: usize) -> io::Result<Self> {
        self.params.lbfgs.set_max_iterations(max_iterations)?;
        Ok(self)
    }

    /// Set convergence epsilon (builder pattern)
    pub fn with_epsilon(mut self, epsilon: f64) -> io::Result<Self> {
        self.params.lbfgs.set_epsilon(epsilon)?;
        Ok(self)
    }

    /// Enable or disable parallel evaluation (builder pattern)
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.params.set_parallel(parallel);
        self
    }

    /// Append a training instance
    ///
    /// Every token must carry a gold tag.
    pub fn append(&mut self, instance: Instance) -> io::Result<()> {
        if instance.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "empty sequences are not allowed",
            ));
        }
        if instance.tags().any(|tag| tag.is_none()) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "training instance has an untagged token",
            ));
        }
        self.instances.push(instance);
        Ok(())
    }

    /// Append training data as parallel token and tag sequences
    pub fn append_sequence<T, L>(&mut self, xseq: &[T], yseq: &[L]) -> io::Result<()>
    where
        T: Clone + Into<Token>,
        L: AsRef<str>,
    {
        if xseq.len() != yseq.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "xseq and yseq must have the same length",
            ));
        }
        let mut instance = Instance::with_capacity(xseq.len());
        for (token, tag) in xseq.iter().zip(yseq) {
            instance.push(token.clone().into(), Some(tag.as_ref().to_string()));
        }
        self.append(instance)
    }

    /// Clear all training data
    pub fn clear(&mut self) {
        self.instances.clear();
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    /// Train a model on the appended instances
    pub fn train(&self) -> io::Result<Model> {
        if self.instances.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no training data",
            ));
        }
        let started = Instant::now();

        let vocabulary = Vocabulary::build(
            self.instances
                .iter()
                .flat_map(|inst| inst.tokens().map(Token::word)),
        );
        let tags = TagSet::build(self.instances.iter().flat_map(|inst| inst.tags().flatten()))?;

        let mut features = FeatureIndex::new();
        let batch =
            features.build_training(&self.instances, &self.templates, &vocabulary, &tags)?;
        info!(
            instances = self.instances.len(),
            words = vocabulary.len(),
            tags = tags.len(),
            contexts = features.num_contexts(),
            features = features.num_features(),
            "generated training features"
        );

        let objective = LogLikelihood::new(&features, &batch, &tags, self.params.sigma)?
            .with_parallel(self.params.parallel);

        let mut rng = StdRng::seed_from_u64(self.params.seed);
        let scale = self.params.init_scale;
        let start: Vec<f64> = (0..features.num_features())
            .map(|_| {
                if scale > 0.0 {
                    rng.random_range(-scale..scale)
                } else {
                    0.0
                }
            })
            .collect();

        info!(
            sigma = self.params.sigma,
            seed = self.params.seed,
            "starting lbfgs"
        );
        let weights = lbfgs::minimize(&objective, start, &self.params.lbfgs)?;
        info!(
            elapsed = started.elapsed().as_secs_f64(),
            "training completed"
        );

        Model::new(self.templates.clone(), vocabulary, tags, features, weights)
    }
}
