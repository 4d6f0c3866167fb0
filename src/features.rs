//! Feature enumeration, frequency pruning, and reference index
//! construction (spec §4.2).
//!
//! Grounded on `original_source/lib/crf/src/crf1m_feature.c`
//! (`crf1mt_generate_features`, dedup-by-sum via an ordered set) and the
//! two-pass reference-building shape of `crf1df_init_references` in
//! `crf1d_train.c`. No BOS/EOS sentinel transition features are emitted --
//! only the simpler scheme (state features per item, transition features
//! for t >= 1) that the newer CRF1-D code path uses.

use std::collections::BTreeMap;

use crate::data::Dataset;

/// Which side of a dyad feature a `Feature` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FeatureKind {
    State,
    Transition,
}

/// A single learned parameter's identity: which kind of feature, which
/// (src, dst) pair it connects, and its observation expectation
/// (frequency) on the training set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Feature {
    pub kind: FeatureKind,
    pub src: u32,
    pub dst: u32,
    pub frequency: f64,
}

/// Options controlling feature generation (spec §4.2 / §6 config keys).
#[derive(Debug, Clone, Copy)]
pub struct FeatureGenOptions {
    pub connect_all_states: bool,
    pub connect_all_transitions: bool,
    pub min_freq: f64,
}

impl Default for FeatureGenOptions {
    fn default() -> Self {
        FeatureGenOptions {
            connect_all_states: false,
            connect_all_transitions: false,
            min_freq: 0.0,
        }
    }
}

/// Maps an attribute or label id into the contiguous segment of feature
/// ids it participates in: one flat buffer plus an offset table, not
/// per-id heap allocations (per Design Notes).
#[derive(Debug, Clone, Default)]
pub struct RefIndex {
    offsets: Vec<u32>,
    ids: Vec<u32>,
}

impl RefIndex {
    fn build(num_keys: usize, pairs: &[(u32, u32)]) -> Self {
        let mut counts = vec![0u32; num_keys];
        for &(key, _) in pairs {
            counts[key as usize] += 1;
        }
        let mut offsets = vec![0u32; num_keys + 1];
        for i in 0..num_keys {
            offsets[i + 1] = offsets[i] + counts[i];
        }
        let mut cursor = offsets.clone();
        let mut ids = vec![0u32; pairs.len()];
        for &(key, feature_id) in pairs {
            let pos = &mut cursor[key as usize];
            ids[*pos as usize] = feature_id;
            *pos += 1;
        }
        RefIndex { offsets, ids }
    }

    pub fn get(&self, key: u32) -> &[u32] {
        let key = key as usize;
        if key + 1 >= self.offsets.len() {
            return &[];
        }
        &self.ids[self.offsets[key] as usize..self.offsets[key + 1] as usize]
    }
}

/// The full set of active features plus the reference indices built from
/// them; produced once by [`FeatureTable::generate`] and read-only for
/// the lifetime of an `Encoder`.
#[derive(Debug, Clone, Default)]
pub struct FeatureTable {
    features: Vec<Feature>,
    attr_refs: RefIndex,
    label_refs: RefIndex,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn get(&self, feature_id: u32) -> Feature {
        self.features[feature_id as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &Feature)> {
        self.features.iter().enumerate().map(|(i, f)| (i as u32, f))
    }

    /// Feature ids of state features whose src is `attr`.
    pub fn attr_refs(&self, attr: u32) -> &[u32] {
        self.attr_refs.get(attr)
    }

    /// Feature ids of transition features whose src is `label`.
    pub fn label_refs(&self, label: u32) -> &[u32] {
        self.label_refs.get(label)
    }

    /// Run the enumerate/prune/sort/index pipeline of spec §4.2 over
    /// `dataset`, given the number of labels and attributes the dataset's
    /// dictionaries have already interned.
    pub fn generate(
        dataset: &Dataset,
        num_labels: usize,
        num_attrs: usize,
        opts: FeatureGenOptions,
    ) -> Self {
        let mut state_freq: BTreeMap<(u32, u32), f64> = BTreeMap::new();
        let mut trans_freq: BTreeMap<(u32, u32), f64> = BTreeMap::new();

        for instance in dataset.instances.iter().filter(|inst| inst.is_labeled()) {
            for (t, item) in instance.items.iter().enumerate() {
                let y = instance.labels[t];
                for content in &item.attributes {
                    *state_freq.entry((content.attribute_id, y)).or_insert(0.0) +=
                        content.scale;
                }
                if opts.connect_all_states {
                    for l in 0..num_labels as u32 {
                        for content in &item.attributes {
                            state_freq.entry((content.attribute_id, l)).or_insert(0.0);
                        }
                    }
                }
                if t >= 1 {
                    let prev = instance.labels[t - 1];
                    *trans_freq.entry((prev, y)).or_insert(0.0) += 1.0;
                }
            }
        }

        if opts.connect_all_transitions {
            for i in 0..num_labels as u32 {
                for j in 0..num_labels as u32 {
                    trans_freq.entry((i, j)).or_insert(0.0);
                }
            }
        }

        let mut features: Vec<Feature> = Vec::new();
        for (&(src, dst), &frequency) in state_freq.iter() {
            if frequency >= opts.min_freq {
                features.push(Feature {
                    kind: FeatureKind::State,
                    src,
                    dst,
                    frequency,
                });
            }
        }
        for (&(src, dst), &frequency) in trans_freq.iter() {
            if frequency >= opts.min_freq {
                features.push(Feature {
                    kind: FeatureKind::Transition,
                    src,
                    dst,
                    frequency,
                });
            }
        }
        // BTreeMap iteration is already ordered by (src, dst) within each
        // kind; this just fixes the State-before-Transition ordering.
        features.sort_by_key(|f| (f.kind, f.src, f.dst));

        let attr_pairs: Vec<(u32, u32)> = features
            .iter()
            .enumerate()
            .filter(|(_, f)| f.kind == FeatureKind::State)
            .map(|(id, f)| (f.src, id as u32))
            .collect();
        let label_pairs: Vec<(u32, u32)> = features
            .iter()
            .enumerate()
            .filter(|(_, f)| f.kind == FeatureKind::Transition)
            .map(|(id, f)| (f.src, id as u32))
            .collect();

        FeatureTable {
            attr_refs: RefIndex::build(num_attrs, &attr_pairs),
            label_refs: RefIndex::build(num_labels, &label_pairs),
            features,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Instance, Item};
    use crate::dictionary::Dictionary;

    fn toy_dataset() -> Dataset {
        let mut ds = Dataset::new();
        let a0 = ds.attributes.intern("a0").unwrap();
        let a1 = ds.attributes.intern("a1").unwrap();
        let l0 = ds.labels.intern("A").unwrap();
        let l1 = ds.labels.intern("B").unwrap();

        let mut i0 = Item::new();
        i0.push(a0, 1.0);
        let mut i1 = Item::new();
        i1.push(a1, 2.0);

        let mut inst = Instance::new();
        inst.items = vec![i0, i1];
        inst.labels = vec![l0, l1];
        ds.push(inst);
        ds
    }

    #[test]
    fn generates_state_and_transition_features() {
        let ds = toy_dataset();
        let table = FeatureTable::generate(
            &ds,
            ds.num_labels(),
            ds.num_attrs(),
            FeatureGenOptions::default(),
        );
        // One state feature per item (a0->A, a1->B), one transition (A->B).
        assert_eq!(table.len(), 3);
        let trans: Vec<_> = table.iter().filter(|(_, f)| f.kind == FeatureKind::Transition).collect();
        assert_eq!(trans.len(), 1);
        assert_eq!(trans[0].1.frequency, 1.0);
    }

    #[test]
    fn min_freq_prunes_features() {
        let ds = toy_dataset();
        let opts = FeatureGenOptions {
            min_freq: 1.5,
            ..Default::default()
        };
        let table = FeatureTable::generate(&ds, ds.num_labels(), ds.num_attrs(), opts);
        // a0->A has frequency 1.0 (< 1.5, dropped); a1->B has 2.0 (kept);
        // A->B transition has frequency 1.0 (< 1.5, dropped).
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0).frequency, 2.0);
    }

    #[test]
    fn min_freq_boundary_is_inclusive() {
        let ds = toy_dataset();
        let opts = FeatureGenOptions {
            min_freq: 1.0,
            ..Default::default()
        };
        let table = FeatureTable::generate(&ds, ds.num_labels(), ds.num_attrs(), opts);
        // frequency == min_freq is kept (spec §8 boundary case).
        assert!(table.iter().any(|(_, f)| f.frequency == 1.0));
    }

    #[test]
    fn attr_refs_and_label_refs_are_contiguous_segments() {
        let ds = toy_dataset();
        let table = FeatureTable::generate(
            &ds,
            ds.num_labels(),
            ds.num_attrs(),
            FeatureGenOptions::default(),
        );
        let a0 = ds.attributes.lookup("a0").unwrap();
        let refs = table.attr_refs(a0);
        assert_eq!(refs.len(), 1);
        assert_eq!(table.get(refs[0]).src, a0);
    }
}
