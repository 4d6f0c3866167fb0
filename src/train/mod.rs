//! Training drivers and the `Trainer` facade that unifies them behind one
//! encoder/objective interface (spec §4.4, §6).
//!
//! `original_source` has three near-duplicate CRF implementations
//! (`crf1m`, `crf1d_learn`, `crf1d_train`); per the Design Notes this
//! crate collapses them into the single [`crate::encoder::Encoder`], and
//! each driver submodule here only differs in how it walks the
//! encoder/objective surface (batch vs. online).

pub mod arow;
pub mod lbfgs;
pub mod passive_aggressive;
pub mod perceptron;
pub mod sgd;

use std::path::Path;

use crate::config::{ParamTable, ParamValue};
use crate::data::{Dataset, Instance};
use crate::dictionary::{Dictionary, VecDictionary};
use crate::encoder::Encoder;
use crate::error::{CrfError, Result};
use crate::eval::Evaluation;
use crate::features::FeatureGenOptions;
use crate::model::ModelWriter;

/// Which training algorithm a [`Trainer`] drives (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Lbfgs,
    Sgd,
    AveragedPerceptron,
    PassiveAggressive,
    Arow,
}

/// Feeds a dataset to one of the five training drivers and writes the
/// resulting model (spec §6's exposed library contract).
pub struct Trainer {
    algorithm: Algorithm,
    params: ParamTable,
    dataset: Dataset,
}

impl Trainer {
    pub fn new(algorithm: Algorithm) -> Self {
        let mut params = ParamTable::new();
        params.register(
            "feature.minfreq",
            ParamValue::Float(0.0),
            "prune features whose observation expectation is below this",
        );
        params.register(
            "feature.possible_states",
            ParamValue::Bool(false),
            "connect every (attribute, label) pair, even unobserved ones",
        );
        params.register(
            "feature.possible_transitions",
            ParamValue::Bool(false),
            "connect every (label, label) transition, even unobserved ones",
        );
        params.register(
            "model.prune",
            ParamValue::Bool(true),
            "drop zero-weight features and densely remap surviving ids on save",
        );
        match algorithm {
            Algorithm::Lbfgs => lbfgs::register(&mut params),
            Algorithm::Sgd => sgd::register(&mut params),
            Algorithm::AveragedPerceptron => perceptron::register(&mut params),
            Algorithm::PassiveAggressive => passive_aggressive::register(&mut params),
            Algorithm::Arow => arow::register(&mut params),
        }
        Trainer {
            algorithm,
            params,
            dataset: Dataset::new(),
        }
    }

    /// `trainer.set(name, value)` (spec §6): unknown names fail with
    /// `CrfError::NotSupported`.
    pub fn set(&mut self, name: &str, value: ParamValue) -> Result<()> {
        self.params.set(name, value)
    }

    /// The dataset's label dictionary, for interning gold label strings
    /// before building an [`Instance`].
    pub fn labels_mut(&mut self) -> &mut VecDictionary {
        &mut self.dataset.labels
    }

    /// The dataset's attribute dictionary, for interning attribute
    /// strings before building an [`Item`](crate::data::Item).
    pub fn attributes_mut(&mut self) -> &mut VecDictionary {
        &mut self.dataset.attributes
    }

    /// `trainer.append(instance)` (spec §6): feed one training instance.
    /// Fails once the dataset has been sealed by a prior `train` call.
    pub fn append(&mut self, instance: Instance) -> Result<()> {
        if self.dataset.is_sealed() {
            return Err(CrfError::NotSupported(
                "cannot append to a trainer after train() has sealed its dataset".into(),
            ));
        }
        self.dataset.push(instance);
        Ok(())
    }

    /// `trainer.train(model_path, holdout_group)` (spec §6): seals the
    /// dataset, splits off `holdout_group` (if any) before feature
    /// generation so it never contributes a frequency or a gradient step,
    /// runs the configured driver, evaluates on the holdout split if one
    /// was requested, and writes the resulting model. Returns `0` on
    /// success (spec §6: "0 success, non-zero on overflow/internal logic
    /// errors").
    pub fn train(&mut self, model_path: &Path, holdout_group: Option<u32>) -> Result<i32> {
        self.dataset.seal();
        let (train_set, holdout_set) = self.dataset.split_holdout(holdout_group);

        let opts = FeatureGenOptions {
            min_freq: self.params.get_f64("feature.minfreq"),
            connect_all_states: self.params.get_bool("feature.possible_states"),
            connect_all_transitions: self.params.get_bool("feature.possible_transitions"),
        };

        let mut encoder = match Encoder::initialize(&train_set, opts) {
            Ok(enc) => enc,
            Err(e) => return Err(e),
        };

        let weights = match self.run_driver(&mut encoder) {
            Ok(w) => w,
            Err(CrfError::Overflow(msg)) => {
                tracing::warn!(error = %msg, "training aborted on overflow");
                return Ok(1);
            }
            Err(e) => return Err(e),
        };

        if !holdout_set.is_empty() {
            encoder.set_weights(&weights, 1.0);
            let mut eval = Evaluation::new();
            for inst in &holdout_set.instances {
                if !inst.is_labeled() {
                    continue;
                }
                let (predicted, _) = encoder.tag(inst)?;
                eval.add_sequence(&inst.labels, &predicted);
            }
            tracing::info!(
                token_accuracy = eval.token_accuracy(),
                sequence_accuracy = eval.sequence_accuracy(),
                macro_f1 = eval.macro_f1(),
                "holdout evaluation"
            );
        }

        let labels: Vec<String> = (0..train_set.num_labels())
            .map(|i| train_set.labels.reverse(i as u32).unwrap_or("").to_owned())
            .collect();
        let attrs: Vec<String> = (0..train_set.num_attrs())
            .map(|i| train_set.attributes.reverse(i as u32).unwrap_or("").to_owned())
            .collect();
        let prune = self.params.get_bool("model.prune");

        ModelWriter::save(model_path, encoder.features(), &labels, &attrs, &weights, prune)?;
        Ok(0)
    }

    fn run_driver(&self, encoder: &mut Encoder) -> Result<Vec<f64>> {
        match self.algorithm {
            Algorithm::Lbfgs => lbfgs::run(encoder, &self.params),
            Algorithm::Sgd => sgd::run(encoder, &self.params),
            Algorithm::AveragedPerceptron => perceptron::run(encoder, &self.params),
            Algorithm::PassiveAggressive => passive_aggressive::run(encoder, &self.params),
            Algorithm::Arow => arow::run(encoder, &self.params),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Item;

    fn toy_instance(trainer: &mut Trainer, group_id: u32) -> Instance {
        let a0 = trainer.attributes_mut().intern("a0").unwrap();
        let a1 = trainer.attributes_mut().intern("a1").unwrap();
        let l0 = trainer.labels_mut().intern("A").unwrap();
        let l1 = trainer.labels_mut().intern("B").unwrap();

        let mut i0 = Item::new();
        i0.push(a0, 1.0);
        let mut i1 = Item::new();
        i1.push(a1, 1.0);

        let mut inst = Instance::new();
        inst.items = vec![i0, i1];
        inst.labels = vec![l0, l1];
        inst.group_id = group_id;
        inst
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let mut trainer = Trainer::new(Algorithm::PassiveAggressive);
        assert!(trainer.set("not.a.real.param", ParamValue::Float(1.0)).is_err());
    }

    #[test]
    fn train_then_tag_round_trips_through_saved_model() {
        let mut trainer = Trainer::new(Algorithm::AveragedPerceptron);
        trainer.set("perceptron.max_iterations", ParamValue::Int(20)).unwrap();
        for _ in 0..4 {
            let inst = toy_instance(&mut trainer, 0);
            trainer.append(inst).unwrap();
        }

        let path = std::env::temp_dir().join(format!("crf-core-trainer-test-{}.model", std::process::id()));
        let code = trainer.train(&path, None).unwrap();
        assert_eq!(code, 0);

        let tagger = crate::tagger::Tagger::open(&path).unwrap();
        let mut ctx = tagger.new_context();
        let a0 = tagger.attr_to_id("a0").unwrap();
        let a1 = tagger.attr_to_id("a1").unwrap();
        let mut i0 = Item::new();
        i0.push(a0, 1.0);
        let mut i1 = Item::new();
        i1.push(a1, 1.0);
        let mut inst = Instance::new();
        inst.items = vec![i0, i1];
        let (path_labels, _) = tagger.tag(&inst, &mut ctx).unwrap();
        assert_eq!(tagger.label_string(path_labels[0]), Some("A"));
        assert_eq!(tagger.label_string(path_labels[1]), Some("B"));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn holdout_group_is_excluded_from_training() {
        let mut trainer = Trainer::new(Algorithm::Sgd);
        trainer.set("sgd.max_iterations", ParamValue::Int(5)).unwrap();
        for _ in 0..3 {
            let inst = toy_instance(&mut trainer, 0);
            trainer.append(inst).unwrap();
        }
        let holdout_inst = toy_instance(&mut trainer, 1);
        trainer.append(holdout_inst).unwrap();

        let path = std::env::temp_dir().join(format!("crf-core-trainer-holdout-{}.model", std::process::id()));
        let code = trainer.train(&path, Some(1)).unwrap();
        assert_eq!(code, 0);
        let _ = std::fs::remove_file(&path);
    }
}
