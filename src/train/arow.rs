//! AROW (Adaptive Regularization of Weight vectors) online training
//! ([SUPPLEMENT] -- spec §4.4.5; `original_source` ships no AROW driver,
//! only L-BFGS/L2SGD/averaged-perceptron/passive-aggressive, but spec.md
//! §4.4.5 and the external interface in §6 name it as a fifth algorithm).
//!
//! Builds the same sparse `delta` symmetric-difference vector as
//! [`crate::train::passive_aggressive`], but replaces the scalar `tau`
//! update with a per-feature confidence (variance) vector and the
//! diagonal-covariance AROW update rule (Crammer et al., 2009): each
//! feature's effective learning rate shrinks as its variance is driven
//! down by repeated updates.

use std::collections::HashMap;

use crate::config::ParamTable;
use crate::encoder::Encoder;
use crate::error::Result;
use crate::logging::TrainingEvent;

pub fn register(params: &mut ParamTable) {
    use crate::config::ParamValue::*;
    params.register("arow.max_iterations", Int(100), "maximum epochs");
    params.register("arow.epsilon", Float(0.0), "stop when mismatches/instance falls below this");
    params.register("arow.c", Float(1.0), "regularization tradeoff C");
    params.register("arow.cost_sensitive", Bool(false), "use sqrt(mismatches) cost term instead of 1");
    params.register("arow.seed", Int(0), "seed for per-epoch shuffling");
}

fn build_delta(encoder: &Encoder, gold: &[u32], predicted: &[u32]) -> HashMap<u32, f64> {
    let mut delta: HashMap<u32, f64> = HashMap::new();
    encoder.features_on_path(gold, |fid, contribution| {
        *delta.entry(fid).or_insert(0.0) += contribution;
    });
    encoder.features_on_path(predicted, |fid, contribution| {
        *delta.entry(fid).or_insert(0.0) -= contribution;
    });
    delta
}

/// Runs AROW training to convergence, returning the final weight vector.
/// The per-feature variance vector `sigma` (initialized to 1.0, the
/// uninformative prior) is scratch state private to this driver.
pub fn run(encoder: &mut Encoder, params: &ParamTable) -> Result<Vec<f64>> {
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    let n = encoder.num_features();
    let max_iterations = params.get_i64("arow.max_iterations").max(1) as u64;
    let epsilon = params.get_f64("arow.epsilon");
    let c = params.get_f64("arow.c").max(1e-12);
    let r = 1.0 / (2.0 * c);
    let cost_sensitive = params.get_bool("arow.cost_sensitive");
    let seed = params.get_i64("arow.seed") as u64;

    let mut w = vec![0.0f64; n];
    let mut sigma = vec![1.0f64; n];
    let mut rng = StdRng::seed_from_u64(seed);
    let num_instances = encoder.num_training_instances();

    for iteration in 0..max_iterations {
        let mut order: Vec<usize> = (0..num_instances).collect();
        order.shuffle(&mut rng);

        let mut total_mismatches = 0u64;

        for &idx in &order {
            let inst = encoder.training_instance(idx).clone();
            encoder.set_weights(&w, 1.0);
            let (predicted, sv) = encoder.tag(&inst)?;
            let sc = encoder.score(&inst.labels);

            let mismatches = inst
                .labels
                .iter()
                .zip(&predicted)
                .filter(|(g, p)| g != p)
                .count();
            total_mismatches += mismatches as u64;

            let cost_term = if cost_sensitive {
                (mismatches as f64).sqrt()
            } else if mismatches > 0 {
                1.0
            } else {
                0.0
            };
            let loss = ((sv - sc) + cost_term).max(0.0);

            if loss > 0.0 {
                let delta = build_delta(encoder, &inst.labels, &predicted);
                // Diagonal covariance: delta^T Sigma delta = sum_i sigma_i * delta_i^2.
                let confidence: f64 = delta.iter().map(|(fid, d)| sigma[*fid as usize] * d * d).sum();
                let beta = 1.0 / (confidence + r);
                let alpha = (loss * beta).max(0.0);

                for (fid, d) in &delta {
                    let i = *fid as usize;
                    w[i] += alpha * sigma[i] * d;
                }
                for (fid, d) in &delta {
                    let i = *fid as usize;
                    let sd = sigma[i] * d;
                    sigma[i] = (sigma[i] - beta * sd * sd).max(1e-12);
                }
            }
        }

        let mismatch_rate = total_mismatches as f64 / num_instances.max(1) as f64;
        TrainingEvent {
            iteration,
            loss: mismatch_rate,
            feature_norm: crate::numeric::vecnorm2(&w).sqrt(),
            gradient_norm: None,
            elapsed: std::time::Duration::ZERO,
            holdout_accuracy: None,
        }
        .emit();

        if mismatch_rate < epsilon {
            break;
        }
    }

    Ok(w)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Dataset, Instance, Item};
    use crate::dictionary::Dictionary;
    use crate::features::FeatureGenOptions;

    fn separable_dataset() -> Dataset {
        let mut ds = Dataset::new();
        let a_pos = ds.attributes.intern("positive").unwrap();
        let a_neg = ds.attributes.intern("negative").unwrap();
        let l_a = ds.labels.intern("A").unwrap();
        let l_b = ds.labels.intern("B").unwrap();

        for _ in 0..5 {
            let mut i0 = Item::new();
            i0.push(a_pos, 1.0);
            let mut i1 = Item::new();
            i1.push(a_neg, 1.0);
            let mut inst = Instance::new();
            inst.items = vec![i0, i1];
            inst.labels = vec![l_a, l_b];
            ds.push(inst);
        }
        ds.seal();
        ds
    }

    #[test]
    fn converges_on_separable_data() {
        let ds = separable_dataset();
        let mut encoder = Encoder::initialize(&ds, FeatureGenOptions::default()).unwrap();
        let mut params = ParamTable::new();
        register(&mut params);
        params.set("arow.max_iterations", crate::config::ParamValue::Int(50)).unwrap();

        let w = run(&mut encoder, &params).unwrap();
        encoder.set_weights(&w, 1.0);
        for i in 0..encoder.num_training_instances() {
            let inst = encoder.training_instance(i).clone();
            let (path, _) = encoder.tag(&inst).unwrap();
            assert_eq!(path, inst.labels);
        }
    }
}
