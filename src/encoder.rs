//! The encoder: bridges a generic training driver to the inference
//! context and feature table, exposing both the batch (L-BFGS-facing)
//! objective and the online single-instance surface (spec §4.3).
//!
//! `original_source` has three near-duplicate implementations of this
//! same idea (`crf1m.c`, `crf1d_learn.c`, `crf1d_train.c`); this collapses
//! them into one type parameterized only by which surface a driver calls,
//! per the Design Notes. The shared state/transition/score kernels live
//! in `context.rs`.

use crate::data::{Dataset, Instance, Item};
use crate::error::{CrfError, Result};
use crate::features::{FeatureGenOptions, FeatureKind, FeatureTable};

use crate::context::Context;

/// Generates features from a dataset, allocates an inference context
/// sized for the dataset's longest instance, and exposes the batch and
/// online objective surfaces described in spec §4.3.
pub struct Encoder {
    features: FeatureTable,
    context: Context,
    num_labels: usize,
    num_attrs: usize,
    weights: Vec<f64>,
    weight_scale: f64,
    training_instances: Vec<Instance>,

    // Items and labels of whatever instance `set_instance` last bound;
    // kept owned (rather than borrowed) so the encoder's lifetime stays
    // independent of the caller's dataset.
    current_items: Vec<Item>,
    current_labels: Vec<u32>,
}

impl Encoder {
    /// `initialize(dataset) -> K` (spec §4.3): generate features, build
    /// refs, allocate context for max T, return K = |features|.
    pub fn initialize(dataset: &Dataset, opts: FeatureGenOptions) -> Result<Self> {
        if !dataset.is_sealed() {
            return Err(CrfError::InternalLogic(
                "dataset must be sealed before Encoder::initialize".into(),
            ));
        }
        let num_labels = dataset.num_labels();
        let num_attrs = dataset.num_attrs();
        if num_labels == 0 {
            return Err(CrfError::Incompatible("dataset has no labels".into()));
        }

        let features = FeatureTable::generate(dataset, num_labels, num_attrs, opts);
        let max_t = dataset.instances.iter().map(Instance::len).max().unwrap_or(0);

        let mut context = Context::new(num_labels);
        if max_t > 0 {
            context.set_num_items(max_t);
        }

        let training_instances: Vec<Instance> = dataset
            .instances
            .iter()
            .filter(|inst| inst.is_labeled())
            .cloned()
            .collect();

        Ok(Encoder {
            weights: vec![0.0; features.len()],
            features,
            context,
            num_labels,
            num_attrs,
            weight_scale: 1.0,
            training_instances,
            current_items: Vec::new(),
            current_labels: Vec::new(),
        })
    }

    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    pub fn num_labels(&self) -> usize {
        self.num_labels
    }

    pub fn num_attrs(&self) -> usize {
        self.num_attrs
    }

    pub fn features(&self) -> &FeatureTable {
        &self.features
    }

    pub fn num_training_instances(&self) -> usize {
        self.training_instances.len()
    }

    pub fn training_instance(&self, idx: usize) -> &Instance {
        &self.training_instances[idx]
    }

    /// `set_weights(w, scale)` (spec §4.3): stage a weight vector and
    /// uniform scale factor, and refill the transition table in log
    /// space (level 1 of the ladder).
    pub fn set_weights(&mut self, w: &[f64], scale: f64) {
        debug_assert_eq!(w.len(), self.features.len());
        self.weights.copy_from_slice(w);
        self.weight_scale = scale;
        self.context.reset_transitions();
        for (fid, feat) in self.features.iter() {
            if feat.kind == FeatureKind::Transition {
                let v = self.weights[fid as usize] * self.weight_scale;
                self.context.trans_mut(feat.src as usize)[feat.dst as usize] += v;
            }
        }
    }

    /// `set_instance(inst)` (spec §4.3): bind an instance, filling the
    /// state table (level 2) from the currently staged weights.
    pub fn set_instance(&mut self, inst: &Instance) {
        self.context.set_num_items(inst.len());
        self.context.reset_state();
        self.current_items = inst.items.clone();
        self.current_labels = inst.labels.clone();

        for (t, item) in self.current_items.iter().enumerate() {
            for content in &item.attributes {
                for &fid in self.features.attr_refs(content.attribute_id) {
                    let feat = self.features.get(fid);
                    let v = self.weights[fid as usize] * self.weight_scale * content.scale;
                    self.context.state_mut(t)[feat.dst as usize] += v;
                }
            }
        }
    }

    /// `viterbi(out_path, &score)` (spec §4.3): decode in log space.
    /// Requires the context to still hold additive tables (i.e. no
    /// `partition_factor`/`objective_and_gradients` call since the last
    /// `set_instance`).
    pub fn viterbi(&mut self) -> Result<(Vec<u32>, f64)> {
        self.context.viterbi()
    }

    /// Convenience used by the online drivers and holdout evaluation:
    /// binds `inst` and decodes it in one step.
    pub fn tag(&mut self, inst: &Instance) -> Result<(Vec<u32>, f64)> {
        self.set_instance(inst);
        self.viterbi()
    }

    /// `score(path, &score)` (spec §4.3).
    pub fn score(&self, path: &[u32]) -> f64 {
        self.context.score(path)
    }

    /// `partition_factor(&Z)` (spec §4.3): run the forward pass, return
    /// log Z.
    pub fn partition_factor(&mut self) -> Result<f64> {
        self.context.alpha_pass()?;
        Ok(self.context.log_norm)
    }

    /// `objective_and_gradients(f, g, gain)` (spec §4.3): for the
    /// currently bound instance, `g += gain * (observed - expected)`,
    /// `f = -log p`.
    pub fn objective_and_gradients(&mut self, f: &mut f64, g: &mut [f64], gain: f64) -> Result<()> {
        debug_assert_eq!(g.len(), self.features.len());
        if self.current_labels.len() != self.current_items.len() {
            return Err(CrfError::InternalLogic(
                "objective_and_gradients called on an unlabeled instance".into(),
            ));
        }

        let gold_score = self.context.score(&self.current_labels);
        self.context.alpha_pass()?;
        self.context.beta_pass()?;
        self.context.marginals()?;

        *f += self.context.log_norm - gold_score;
        self.accumulate(g, gain, true, true);
        Ok(())
    }

    /// `objective_and_gradients_batch(w, &f, g)` (spec §4.3): negative
    /// conditional log likelihood and its gradient over the whole
    /// training set. `g` is pre-initialized with `-feature.frequency`
    /// (the negated observation expectation, which already sums the
    /// observed term over every training instance), then only model
    /// expectations accumulate on top, with `+` sign -- the per-instance
    /// observed term must not be re-added here or it would cancel the
    /// pre-init exactly.
    pub fn objective_and_gradients_batch(
        &mut self,
        w: &[f64],
        f: &mut f64,
        g: &mut [f64],
    ) -> Result<()> {
        debug_assert_eq!(w.len(), self.features.len());
        debug_assert_eq!(g.len(), self.features.len());

        for (fid, feat) in self.features.iter() {
            g[fid as usize] = -feat.frequency;
        }
        *f = 0.0;

        self.set_weights(w, 1.0);
        let n = self.training_instances.len();
        for idx in 0..n {
            let inst = self.training_instances[idx].clone();
            self.set_instance(&inst);
            let gold_score = self.context.score(&self.current_labels);
            self.context.alpha_pass()?;
            self.context.beta_pass()?;
            self.context.marginals()?;
            *f += self.context.log_norm - gold_score;
            self.accumulate(g, 1.0, false, false);
        }
        Ok(())
    }

    /// `features_on_path(inst, path, sink)` (spec §4.3): enumerate
    /// `(feature_id, contribution)` pairs active for `path` on the
    /// currently bound instance. Used by averaged perceptron and
    /// passive-aggressive to form the symmetric difference of feature
    /// activations between gold and predicted paths.
    pub fn features_on_path(&self, path: &[u32], mut sink: impl FnMut(u32, f64)) {
        for (t, item) in self.current_items.iter().enumerate() {
            let label = path[t];
            for content in &item.attributes {
                for &fid in self.features.attr_refs(content.attribute_id) {
                    let feat = self.features.get(fid);
                    if feat.dst == label {
                        sink(fid, content.scale);
                    }
                }
            }
            if t >= 1 {
                let prev = path[t - 1];
                for &fid in self.features.label_refs(prev) {
                    let feat = self.features.get(fid);
                    if feat.dst == label {
                        sink(fid, 1.0);
                    }
                }
            }
        }
    }

    /// Accumulates this instance's contribution to the gradient.
    ///
    /// `add_observed` gates the `+ gain * observed` terms: the online
    /// surface (`objective_and_gradients`) wants them added per instance,
    /// but the batch surface (`objective_and_gradients_batch`) already
    /// folded the observed term into `g`'s `-feature.frequency` pre-init
    /// (summed once over the whole training set), so it passes
    /// `add_observed = false` to avoid re-adding -- and exactly
    /// cancelling -- that pre-init. `subtract_expected` picks the sign of
    /// the model-expectation term: online mode subtracts it (`observed -
    /// expected`), batch mode adds it on top of the negated frequency
    /// (`-frequency + expected`).
    fn accumulate(&self, g: &mut [f64], gain: f64, add_observed: bool, subtract_expected: bool) {
        let labels = &self.current_labels;
        for (t, item) in self.current_items.iter().enumerate() {
            let y = labels[t];
            for content in &item.attributes {
                for &fid in self.features.attr_refs(content.attribute_id) {
                    let feat = self.features.get(fid);
                    let expected = content.scale * self.context.state_marginal(t, feat.dst as usize);
                    if add_observed && feat.dst == y {
                        g[fid as usize] += gain * content.scale;
                    }
                    if subtract_expected {
                        g[fid as usize] -= gain * expected;
                    } else {
                        g[fid as usize] += gain * expected;
                    }
                }
            }
            if t >= 1 {
                let prev = labels[t - 1];
                for &fid in self.features.label_refs(prev) {
                    let feat = self.features.get(fid);
                    if add_observed && feat.dst == y {
                        g[fid as usize] += gain;
                    }
                }
            }
        }
        for i in 0..self.num_labels {
            for &fid in self.features.label_refs(i as u32) {
                let feat = self.features.get(fid);
                let expected = self.context.transition_marginal(i, feat.dst as usize);
                if subtract_expected {
                    g[fid as usize] -= gain * expected;
                } else {
                    g[fid as usize] += gain * expected;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Instance;
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
        i1.push(a1, 1.0);

        let mut inst = Instance::new();
        inst.items = vec![i0, i1];
        inst.labels = vec![l0, l1];
        ds.push(inst);
        ds.seal();
        ds
    }

    #[test]
    fn initialize_counts_features() {
        let ds = toy_dataset();
        let enc = Encoder::initialize(&ds, FeatureGenOptions::default()).unwrap();
        // state(a0,A), state(a1,B), trans(A,B)
        assert_eq!(enc.num_features(), 3);
    }

    #[test]
    fn viterbi_matches_gold_with_strong_weights() {
        let ds = toy_dataset();
        let mut enc = Encoder::initialize(&ds, FeatureGenOptions::default()).unwrap();
        let w = vec![10.0; enc.num_features()];
        enc.set_weights(&w, 1.0);
        let inst = enc.training_instance(0).clone();
        enc.set_instance(&inst);
        let (path, _) = enc.viterbi().unwrap();
        assert_eq!(path, inst.labels);
    }

    #[test]
    fn partition_factor_is_positive_finite() {
        let ds = toy_dataset();
        let mut enc = Encoder::initialize(&ds, FeatureGenOptions::default()).unwrap();
        let w = vec![0.1; enc.num_features()];
        enc.set_weights(&w, 1.0);
        let inst = enc.training_instance(0).clone();
        enc.set_instance(&inst);
        let log_z = enc.partition_factor().unwrap();
        assert!(log_z.is_finite());
    }
}
