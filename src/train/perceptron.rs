//! Averaged perceptron training (spec §4.4.3).
//!
//! Grounded on `original_source/lib/crf/src/
//! train_averaged_perceptron.c`'s lazy-averaging-by-counter scheme, and on
//! the teacher's own `perceptron.rs` for the "tag, compare, update only on
//! mistake" shape -- reworked here onto the shared `Encoder`/`Context`
//! instead of a standalone `HashMap<(String, String), f64>` model, so the
//! same feature table and Viterbi kernel serve every driver.

use crate::config::ParamTable;
use crate::encoder::Encoder;
use crate::error::Result;
use crate::logging::TrainingEvent;

pub fn register(params: &mut ParamTable) {
    use crate::config::ParamValue::*;
    params.register("perceptron.max_iterations", Int(100), "maximum epochs");
    params.register("perceptron.epsilon", Float(0.0), "stop when mismatches/instance falls below this");
    params.register("perceptron.seed", Int(0), "seed for per-epoch shuffling");
}

/// Runs the averaged perceptron to convergence, returning the averaged
/// weight vector `wa = w - ws / c`.
pub fn run(encoder: &mut Encoder, params: &ParamTable) -> Result<Vec<f64>> {
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;

    let n = encoder.num_features();
    let max_iterations = params.get_i64("perceptron.max_iterations").max(1) as u64;
    let epsilon = params.get_f64("perceptron.epsilon");
    let seed = params.get_i64("perceptron.seed") as u64;

    let mut w = vec![0.0f64; n];
    let mut ws = vec![0.0f64; n];
    let mut c = 1.0f64;
    let mut rng = StdRng::seed_from_u64(seed);

    let num_instances = encoder.num_training_instances();

    for iteration in 0..max_iterations {
        let mut order: Vec<usize> = (0..num_instances).collect();
        order.shuffle(&mut rng);

        let mut total_mismatches = 0u64;
        let mut total_tokens = 0u64;

        for &idx in &order {
            let inst = encoder.training_instance(idx).clone();
            encoder.set_weights(&w, 1.0);
            let (predicted, _) = encoder.tag(&inst)?;

            let mismatches = inst
                .labels
                .iter()
                .zip(&predicted)
                .filter(|(g, p)| g != p)
                .count();
            total_mismatches += mismatches as u64;
            total_tokens += inst.len() as u64;

            if mismatches > 0 {
                encoder.features_on_path(&inst.labels, |fid, contribution| {
                    w[fid as usize] += contribution;
                    ws[fid as usize] += c * contribution;
                });
                encoder.features_on_path(&predicted, |fid, contribution| {
                    w[fid as usize] -= contribution;
                    ws[fid as usize] -= c * contribution;
                });
            }
            c += 1.0;
        }

        let mismatch_rate = if total_tokens == 0 {
            0.0
        } else {
            total_mismatches as f64 / num_instances.max(1) as f64
        };

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

    let mut averaged = vec![0.0f64; n];
    for i in 0..n {
        averaged[i] = w[i] - ws[i] / c;
    }
    Ok(averaged)
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
    fn converges_to_zero_mismatches_on_separable_data() {
        let ds = separable_dataset();
        let mut encoder = Encoder::initialize(&ds, FeatureGenOptions::default()).unwrap();
        let mut params = ParamTable::new();
        register(&mut params);
        params.set("perceptron.max_iterations", crate::config::ParamValue::Int(50)).unwrap();

        let w = run(&mut encoder, &params).unwrap();
        encoder.set_weights(&w, 1.0);
        for i in 0..encoder.num_training_instances() {
            let inst = encoder.training_instance(i).clone();
            let (path, _) = encoder.tag(&inst).unwrap();
            assert_eq!(path, inst.labels);
        }
    }
}
