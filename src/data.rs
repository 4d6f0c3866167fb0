//! Training/tagging data model: attributed items grouped into sequence
//! instances, collected into a dataset.
//!
//! Generalizes `ner-core`'s `FeatureVector` (a `HashMap<String, f64>` per
//! token) to numeric attribute ids, since the encoder and feature table
//! need O(1), cache-friendly access rather than string hashing on every
//! forward-backward pass.

use serde::{Deserialize, Serialize};

use crate::dictionary::{Dictionary, VecDictionary};

/// One (attribute, weight) observation attached to an item.
///
/// `scale` lets a caller express real-valued observations (counts,
/// normalized frequencies) rather than pure presence/absence; a plain
/// boolean attribute is written with `scale: 1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttributeContent {
    pub attribute_id: u32,
    pub scale: f64,
}

impl AttributeContent {
    pub fn new(attribute_id: u32, scale: f64) -> Self {
        AttributeContent {
            attribute_id,
            scale,
        }
    }
}

/// A single position in a sequence: its sparse attribute vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Item {
    pub attributes: Vec<AttributeContent>,
}

impl Item {
    pub fn new() -> Self {
        Item::default()
    }

    pub fn push(&mut self, attribute_id: u32, scale: f64) {
        self.attributes.push(AttributeContent::new(attribute_id, scale));
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// One labeled (or, at tagging time, unlabeled) sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Instance {
    pub items: Vec<Item>,
    /// Gold label ids, one per item. Empty for tagging-only instances.
    pub labels: Vec<u32>,
    /// Arbitrary partition id used for holdout evaluation (§5).
    pub group_id: u32,
}

impl Instance {
    pub fn new() -> Self {
        Instance::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_labeled(&self) -> bool {
        !self.labels.is_empty()
    }
}

/// A collection of instances plus the interned label/attribute vocabularies
/// they reference.
///
/// The two dictionaries are sealed the first time `Encoder::initialize` is
/// called on this dataset (§5's "sealing" lifecycle): after that point
/// `append` may still add instances that use already-known attributes and
/// labels, but unseen strings can no longer be interned through the
/// dataset's own helpers.
#[derive(Debug, Default)]
pub struct Dataset {
    pub instances: Vec<Instance>,
    pub labels: VecDictionary,
    pub attributes: VecDictionary,
}

impl Dataset {
    pub fn new() -> Self {
        Dataset::default()
    }

    pub fn push(&mut self, instance: Instance) {
        self.instances.push(instance);
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn num_labels(&self) -> usize {
        self.labels.size()
    }

    pub fn num_attrs(&self) -> usize {
        self.attributes.size()
    }

    /// Seal both dictionaries, fixing the feature space. Idempotent.
    pub fn seal(&mut self) {
        self.labels.seal();
        self.attributes.seal();
    }

    pub fn is_sealed(&self) -> bool {
        self.labels.is_sealed() && self.attributes.is_sealed()
    }

    /// Instances whose `group_id` matches `holdout_group`, for evaluation.
    pub fn group<'a>(&'a self, group_id: u32) -> impl Iterator<Item = &'a Instance> + 'a {
        self.instances.iter().filter(move |inst| inst.group_id == group_id)
    }

    /// Splits a sealed dataset into `(training, holdout)` datasets sharing
    /// the same sealed label/attribute dictionaries, per spec §4.4's
    /// `trainset`/`testset` split: a holdout group's instances take no
    /// part in feature generation or gradient computation, only in
    /// post-training evaluation.
    pub fn split_holdout(&self, holdout_group: Option<u32>) -> (Dataset, Dataset) {
        let mut train = Dataset {
            instances: Vec::new(),
            labels: self.labels.clone(),
            attributes: self.attributes.clone(),
        };
        let mut holdout = Dataset {
            instances: Vec::new(),
            labels: self.labels.clone(),
            attributes: self.attributes.clone(),
        };
        for inst in &self.instances {
            match holdout_group {
                Some(g) if inst.group_id == g => holdout.instances.push(inst.clone()),
                _ => train.instances.push(inst.clone()),
            }
        }
        (train, holdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dataset_interns_labels_and_attributes() {
        let mut ds = Dataset::new();
        let per = ds.labels.intern("PER").unwrap();
        let attr = ds.attributes.intern("word=Maria").unwrap();

        let mut item = Item::new();
        item.push(attr, 1.0);

        let mut inst = Instance::new();
        inst.items.push(item);
        inst.labels.push(per);
        ds.push(inst);

        assert_eq!(ds.len(), 1);
        assert_eq!(ds.num_labels(), 1);
        assert_eq!(ds.num_attrs(), 1);
    }

    #[test]
    fn sealing_blocks_new_vocabulary() {
        let mut ds = Dataset::new();
        ds.labels.intern("PER").unwrap();
        ds.seal();
        assert!(ds.is_sealed());
        assert_eq!(ds.labels.intern("LOC"), None);
    }

    #[test]
    fn group_filters_by_holdout_partition() {
        let mut ds = Dataset::new();
        let mut a = Instance::new();
        a.group_id = 0;
        let mut b = Instance::new();
        b.group_id = 1;
        ds.push(a);
        ds.push(b);
        assert_eq!(ds.group(1).count(), 1);
    }
}
