use std::io;

use crate::context::{Context, Flag};
use crate::dataset::{Instance, Token};
use crate::feature::InstanceFeatures;
use crate::model::Model;

/// The tagger predicts tag sequences for token sequences using a model
#[derive(Debug, Clone)]
pub struct Tagger<'a> {
    /// CRF model
    model: &'a Model,
    /// Viterbi lattice workspace
    context: Context,
}

impl<'a> Tagger<'a> {
    pub(crate) fn new(model: &'a Model) -> Self {
        let context = Context::new(Flag::VITERBI, model.num_tags(), 0);
        Self { model, context }
    }

    /// Predict the tag sequence for the token sequence.
    pub fn tag(&mut self, tokens: &[Token]) -> io::Result<Vec<&'a str>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let mut instance = Instance::with_capacity(tokens.len());
        for token in tokens {
            instance.push(token.clone(), None);
        }
        let batch = self.model.features().build_decoding(
            std::slice::from_ref(&instance),
            self.model.templates(),
            self.model.vocabulary(),
        )?;
        match batch.get(0) {
            Some(features) => self.decode(features),
            None => Ok(Vec::new()),
        }
    }

    /// Tag a batch of instances, returning copies carrying the predicted tags
    ///
    /// Gold tags present on the input are ignored.
    pub fn tag_instances(&mut self, instances: &[Instance]) -> io::Result<Vec<Instance>> {
        let batch = self.model.features().build_decoding(
            instances,
            self.model.templates(),
            self.model.vocabulary(),
        )?;
        let mut tagged = Vec::with_capacity(instances.len());
        for (instance, features) in instances.iter().zip(batch.iter()) {
            let tags = if instance.is_empty() {
                Vec::new()
            } else {
                self.decode(features)?
            };
            let mut out = Instance::with_capacity(instance.len());
            for (token, tag) in instance.tokens().zip(tags) {
                out.push(token.clone(), Some(tag.to_string()));
            }
            tagged.push(out);
        }
        Ok(tagged)
    }

    fn decode(&mut self, features: &InstanceFeatures) -> io::Result<Vec<&'a str>> {
        let model = self.model;
        self.context
            .compute_potentials(features, model.features(), model.weights());
        let (path, _score) = self.context.viterbi(model.tags())?;
        path.into_iter()
            .map(|id| {
                model.tags().name(id).ok_or_else(|| {
                    io::Error::new(io::ErrorKind::InvalidData, format!("unknown tag id {}", id))
                })
            })
            .collect()
    }
}
