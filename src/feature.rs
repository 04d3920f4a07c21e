//! Feature index table.
//!
//! Every fully tag-qualified feature name owns one slot in the weight vector.
//! Names that share a context (the expanded template, without tags) share a
//! [`TagIndex`] which records, for that context, which tag pairs own a slot.
//! Per-instance lists of active contexts live in a [`BatchFeatures`] side table
//! that is rebuilt wholesale for every batch.

use std::collections::HashMap;
use std::io;

use crate::dataset::Instance;
use crate::dictionary::Dictionary;
use crate::template::{Observation, TemplateKind, TemplateSet};
use crate::vocabulary::{TagSet, Vocabulary};

/// Placeholder previous tag of unigram entries
pub const ANY_TAG: u32 = u32::MAX;

/// One tag combination of a context and the slot it activates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagEntry {
    /// Previous tag, [`ANY_TAG`] for unigram contexts
    pub prev: u32,
    pub cur: u32,
    pub slot: u32,
}

/// Tag-pair activations of one context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagIndex {
    kind: TemplateKind,
    slots: HashMap<(u32, u32), u32>,
    entries: Vec<TagEntry>,
}

impl TagIndex {
    pub fn new(kind: TemplateKind) -> Self {
        Self {
            kind,
            slots: HashMap::new(),
            entries: Vec::new(),
        }
    }

    pub fn kind(&self) -> TemplateKind {
        self.kind
    }

    fn key(&self, prev: u32, cur: u32) -> (u32, u32) {
        match self.kind {
            TemplateKind::Unigram => (ANY_TAG, cur),
            TemplateKind::Bigram => (prev, cur),
        }
    }

    pub(crate) fn insert(&mut self, prev: u32, cur: u32, slot: u32) {
        let key = self.key(prev, cur);
        if self.slots.insert(key, slot).is_none() {
            self.entries.push(TagEntry {
                prev: key.0,
                cur: key.1,
                slot,
            });
        }
    }

    /// Returns `true` if the context is active for the tag pair
    pub fn present(&self, prev: u32, cur: u32) -> bool {
        self.slots.contains_key(&self.key(prev, cur))
    }

    /// Weight slot activated by the tag pair, if any
    pub fn slot(&self, prev: u32, cur: u32) -> Option<u32> {
        self.slots.get(&self.key(prev, cur)).copied()
    }

    /// Entries in the order they were first seen
    pub fn entries(&self) -> &[TagEntry] {
        &self.entries
    }
}

/// Active contexts of one instance, one list per position
///
/// There are `len + 1` positions: position `p` covers the transition into
/// token `p`, the last one the transition into the END anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceFeatures {
    positions: Vec<Vec<u32>>,
    /// Gold tag ids, present for training batches only
    gold: Option<Vec<u32>>,
}

impl InstanceFeatures {
    /// Number of tokens
    pub fn len(&self) -> usize {
        self.positions.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn positions(&self) -> &[Vec<u32>] {
        &self.positions
    }

    pub fn gold(&self) -> Option<&[u32]> {
        self.gold.as_deref()
    }
}

/// Side table of activated features for a batch of instances
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchFeatures {
    instances: Vec<InstanceFeatures>,
}

impl BatchFeatures {
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&InstanceFeatures> {
        self.instances.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, InstanceFeatures> {
        self.instances.iter()
    }

    pub fn as_slice(&self) -> &[InstanceFeatures] {
        &self.instances
    }

    /// Length of the longest instance
    pub fn max_len(&self) -> usize {
        self.instances.iter().map(InstanceFeatures::len).max().unwrap_or(0)
    }
}

/// Feature index table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureIndex {
    /// Qualified feature name -> weight slot
    names: Dictionary,
    /// Context key -> context id
    contexts: Dictionary,
    /// Tag activations, indexed by context id
    tag_indices: Vec<TagIndex>,
}

impl FeatureIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(
        names: Dictionary,
        contexts: Dictionary,
        tag_indices: Vec<TagIndex>,
    ) -> io::Result<Self> {
        if contexts.len() != tag_indices.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "context count does not match tag index count",
            ));
        }
        let num_features = names.len() as u32;
        let out_of_range = tag_indices
            .iter()
            .flat_map(TagIndex::entries)
            .any(|entry| entry.slot >= num_features);
        if out_of_range {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "tag index refers to an unknown feature",
            ));
        }
        Ok(Self {
            names,
            contexts,
            tag_indices,
        })
    }

    /// Number of weight slots
    pub fn num_features(&self) -> usize {
        self.names.len()
    }

    pub fn num_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// Slot of a fully qualified feature name
    pub fn slot(&self, name: &str) -> Option<u32> {
        self.names.get(name)
    }

    pub fn feature_name(&self, slot: u32) -> Option<&str> {
        self.names.get_name(slot)
    }

    pub fn context(&self, key: &str) -> Option<u32> {
        self.contexts.get(key)
    }

    pub fn context_key(&self, id: u32) -> Option<&str> {
        self.contexts.get_name(id)
    }

    pub fn tag_index(&self, context: u32) -> &TagIndex {
        &self.tag_indices[context as usize]
    }

    /// Slot activated by `context` for the tag pair, if any
    #[inline]
    pub fn activated(&self, context: u32, prev: u32, cur: u32) -> Option<u32> {
        self.tag_indices[context as usize].slot(prev, cur)
    }

    pub(crate) fn names(&self) -> &Dictionary {
        &self.names
    }

    pub(crate) fn contexts(&self) -> &Dictionary {
        &self.contexts
    }

    pub(crate) fn tag_indices(&self) -> &[TagIndex] {
        &self.tag_indices
    }

    /// Generate training features, assigning slots to unseen names
    ///
    /// Each position is visited with its gold tag pair only; START stands in
    /// before the first token and END after the last one.
    pub fn build_training(
        &mut self,
        instances: &[Instance],
        templates: &TemplateSet,
        vocabulary: &Vocabulary,
        tags: &TagSet,
    ) -> io::Result<BatchFeatures> {
        let mut batch = Vec::with_capacity(instances.len());
        for instance in instances {
            let gold = gold_path(instance, tags)?;
            let observation = Observation::new(instance, vocabulary);
            let mut positions = Vec::with_capacity(instance.len() + 1);

            for position in 0..=instance.len() {
                let prev = if position == 0 {
                    tags.start()
                } else {
                    gold[position - 1]
                };
                let cur = if position == instance.len() {
                    tags.end()
                } else {
                    gold[position]
                };
                let (prev_name, cur_name) = tag_names(tags, prev, cur)?;

                let descriptors = templates.generate(&observation, position)?;
                let mut active = Vec::with_capacity(descriptors.len());
                for descriptor in descriptors {
                    let slot = self.names.get_or_insert(&descriptor.name(prev_name, cur_name));
                    let context = self.contexts.get_or_insert(&descriptor.key);
                    if context as usize == self.tag_indices.len() {
                        self.tag_indices.push(TagIndex::new(descriptor.kind));
                    }
                    self.tag_indices[context as usize].insert(prev, cur, slot);
                    active.push(context);
                }
                positions.push(active);
            }

            batch.push(InstanceFeatures {
                positions,
                gold: Some(gold),
            });
        }
        Ok(BatchFeatures { instances: batch })
    }

    /// Generate decoding features without touching the index
    ///
    /// Contexts the model has never seen are dropped, which is the same as
    /// giving them a zero weight.
    pub fn build_decoding(
        &self,
        instances: &[Instance],
        templates: &TemplateSet,
        vocabulary: &Vocabulary,
    ) -> io::Result<BatchFeatures> {
        let mut batch = Vec::with_capacity(instances.len());
        for instance in instances {
            let observation = Observation::new(instance, vocabulary);
            let mut positions = Vec::with_capacity(instance.len() + 1);
            for position in 0..=instance.len() {
                let active = templates
                    .generate(&observation, position)?
                    .iter()
                    .filter_map(|descriptor| self.contexts.get(&descriptor.key))
                    .collect();
                positions.push(active);
            }
            batch.push(InstanceFeatures {
                positions,
                gold: None,
            });
        }
        Ok(BatchFeatures { instances: batch })
    }
}

fn gold_path(instance: &Instance, tags: &TagSet) -> io::Result<Vec<u32>> {
    instance
        .tags()
        .map(|tag| {
            let tag = tag.ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "training instance has an untagged token",
                )
            })?;
            tags.id(tag).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("tag {} is not in the tag set", tag),
                )
            })
        })
        .collect()
}

fn tag_names(tags: &TagSet, prev: u32, cur: u32) -> io::Result<(&str, &str)> {
    match (tags.name(prev), tags.name(cur)) {
        (Some(prev), Some(cur)) => Ok((prev, cur)),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "tag id out of range",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus() -> Vec<Instance> {
        vec![
            Instance::tagged(&[("the", "D"), ("cat", "N")]),
            Instance::tagged(&[("a", "D"), ("dog", "N"), ("barks", "V")]),
        ]
    }

    fn build(instances: &[Instance]) -> (FeatureIndex, BatchFeatures, TagSet, Vocabulary) {
        let vocab = Vocabulary::build(instances.iter().flat_map(|i| i.tokens().map(|t| t.word())));
        let tags = TagSet::build(instances.iter().flat_map(|i| i.tags().flatten())).unwrap();
        let mut index = FeatureIndex::new();
        let batch = index
            .build_training(instances, &TemplateSet::default(), &vocab, &tags)
            .unwrap();
        (index, batch, tags, vocab)
    }

    #[test]
    fn test_tag_index_kinds() {
        let mut unigram = TagIndex::new(TemplateKind::Unigram);
        unigram.insert(3, 1, 7);
        assert!(unigram.present(0, 1));
        assert!(unigram.present(2, 1));
        assert_eq!(unigram.slot(5, 1), Some(7));
        assert!(!unigram.present(3, 2));

        let mut bigram = TagIndex::new(TemplateKind::Bigram);
        bigram.insert(3, 1, 9);
        bigram.insert(3, 1, 9);
        assert_eq!(bigram.entries().len(), 1);
        assert_eq!(bigram.slot(3, 1), Some(9));
        assert!(!bigram.present(0, 1));
    }

    #[test]
    fn test_training_positions() {
        let instances = corpus();
        let (index, batch, tags, _) = build(&instances);
        assert_eq!(batch.len(), 2);

        let first = batch.get(0).unwrap();
        assert_eq!(first.len(), 2);
        // len + 1 positions, one context per template at each
        assert_eq!(first.positions().len(), 3);
        assert!(first.positions().iter().all(|p| p.len() == 2));
        assert_eq!(batch.max_len(), 3);

        let d = tags.id("D").unwrap();
        let n = tags.id("N").unwrap();
        assert_eq!(first.gold(), Some(&[d, n][..]));

        // "B|__BOS__|D" is seen in both instances but owns one slot
        let slot = index.slot("B|__BOS__|D").unwrap();
        let bigram = index.context("B").unwrap();
        assert_eq!(index.activated(bigram, tags.start(), d), Some(slot));
        assert_eq!(index.activated(bigram, d, n), index.slot("B|D|N"));
        assert!(index.slot("U00:_B+1|__EOS__").is_some());
        assert_eq!(index.feature_name(slot), Some("B|__BOS__|D"));
    }

    #[test]
    fn test_training_requires_tags() {
        let instances = vec![Instance::untagged(&["cat"])];
        let vocab = Vocabulary::build(["cat"]);
        let tags = TagSet::build(["N"]).unwrap();
        let mut index = FeatureIndex::new();
        let err = index
            .build_training(&instances, &TemplateSet::default(), &vocab, &tags)
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_index_is_deterministic() {
        let instances = corpus();
        let (a, _, _, _) = build(&instances);
        let (b, _, _, _) = build(&instances);
        assert_eq!(a, b);
        let names_a: Vec<_> = a.names().iter().collect();
        let names_b: Vec<_> = b.names().iter().collect();
        assert_eq!(names_a, names_b);
    }

    #[test]
    fn test_decoding_drops_unseen() {
        let instances = corpus();
        let (index, _, _, vocab) = build(&instances);
        let num_features = index.num_features();

        let test = vec![Instance::untagged(&["the", "unicorn"])];
        let batch = index
            .build_decoding(&test, &TemplateSet::default(), &vocab)
            .unwrap();
        let features = batch.get(0).unwrap();
        assert!(features.gold().is_none());
        // "the" and the bigram context are known
        assert_eq!(features.positions()[0].len(), 2);
        // "unicorn" resolves to -UNK-, never seen in training
        assert_eq!(features.positions()[1].len(), 1);
        assert_eq!(index.num_features(), num_features);
    }
}
