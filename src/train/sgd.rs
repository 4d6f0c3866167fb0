//! L2-regularized stochastic gradient descent with Pegasos-style
//! calibration (spec §4.4.2).
//!
//! Grounded line-for-line on `original_source/lib/crf/src/
//! train_l2sgd.c`: the `eta`/`decay`/`scale`/`proj` bookkeeping, the
//! non-enlarging projection step, the below-`1e-20` materialization
//! rule, and the geometric calibration sweep are all preserved exactly
//! as that file implements them.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::config::ParamTable;
use crate::encoder::Encoder;
use crate::error::{CrfError, Result};
use crate::logging::{CalibrationTrialEvent, TrainingEvent};
use crate::numeric::vecnorm2;

pub fn register(params: &mut ParamTable) {
    use crate::config::ParamValue::*;
    params.register("regularization.sigma", Float(10.0), "L2 prior variance");
    params.register("sgd.max_iterations", Int(1000), "maximum epochs");
    params.register("sgd.period", Int(10), "epochs over which to measure improvement");
    params.register("sgd.delta", Float(1e-5), "relative improvement threshold to stop");
    params.register("sgd.calibration.eta", Float(0.1), "initial learning rate guess");
    params.register("sgd.calibration.rate", Float(2.0), "geometric step for calibration sweep");
    params.register("sgd.calibration.samples", Int(1000), "max instances used per calibration trial");
    params.register("sgd.calibration.candidates", Int(10), "accepted trials required before stopping");
    params.register("sgd.seed", Int(0), "seed for per-epoch shuffling");
}

/// One epoch's worth of per-instance gradient evaluation and update,
/// shared between calibration trials and the main loop.
fn epoch(
    encoder: &mut Encoder,
    w: &mut [f64],
    lambda: f64,
    t0: f64,
    mut t: f64,
    order: &[usize],
) -> Result<(f64, f64)> {
    let mut decay = 1.0f64;
    let mut proj = 1.0f64;
    let mut norm2 = vecnorm2(w);
    let mut total_loss = 0.0f64;

    for &idx in order {
        let eta = 1.0 / (lambda * (t0 + t));
        decay *= 1.0 - eta * lambda;
        let scale = decay * proj;
        if !scale.is_finite() {
            return Err(CrfError::Overflow("sgd scale diverged".into()));
        }
        let gain = eta / scale;

        let inst = encoder.training_instance(idx).clone();
        encoder.set_weights(w, scale);
        encoder.set_instance(&inst);
        let mut f = 0.0;
        let mut g = vec![0.0; w.len()];
        encoder.objective_and_gradients(&mut f, &mut g, gain)?;
        if !f.is_finite() {
            return Err(CrfError::Overflow("sgd loss diverged".into()));
        }
        total_loss += f;

        for (wi, gi) in w.iter_mut().zip(&g) {
            let delta = -gi;
            norm2 += 2.0 * (*wi) * delta * scale.powi(2) + delta.powi(2) * scale.powi(2);
            *wi += delta;
        }

        if 1.0 / lambda < norm2 * scale * scale {
            proj = 1.0 / ((norm2 * lambda).sqrt() * scale);
        }

        if scale.abs() < 1e-20 {
            for wi in w.iter_mut() {
                *wi *= scale;
            }
            norm2 = vecnorm2(w);
            decay = 1.0;
            proj = 1.0;
        }

        t += 1.0;
    }

    Ok((total_loss, t))
}

fn calibrate(encoder: &mut Encoder, params: &ParamTable, rng: &mut StdRng) -> f64 {
    let initial_eta = params.get_f64("sgd.calibration.eta");
    let rate = params.get_f64("sgd.calibration.rate");
    let samples = (params.get_i64("sgd.calibration.samples").max(1) as usize)
        .min(encoder.num_training_instances().max(1));
    let candidates = params.get_i64("sgd.calibration.candidates").max(1) as usize;
    let sigma = params.get_f64("regularization.sigma").max(1e-12);
    let lambda = 1.0 / (sigma * sigma * encoder.num_training_instances().max(1) as f64);

    let mut order: Vec<usize> = (0..encoder.num_training_instances()).collect();
    order.shuffle(rng);
    order.truncate(samples);

    let n = encoder.num_features();
    let baseline_w = vec![0.0f64; n];
    let baseline_loss = {
        let mut w = baseline_w.clone();
        let t0 = 1.0 / (lambda * initial_eta);
        epoch(encoder, &mut w, lambda, t0, 0.0, &order).map(|(f, _)| f).unwrap_or(f64::INFINITY)
    };

    let mut best_eta = initial_eta;
    let mut best_loss = baseline_loss;
    let mut accepted = 0u32;
    let mut eta = initial_eta;
    let mut trial = 0u32;

    // Sweep upward, then downward, exactly as the source's calibration
    // loop alternates candidates on either side of the initial guess.
    for direction in [rate, 1.0 / rate] {
        eta = initial_eta;
        loop {
            eta *= direction;
            trial += 1;
            let t0 = 1.0 / (lambda * eta);
            let mut w = baseline_w.clone();
            let loss = epoch(encoder, &mut w, lambda, t0, 0.0, &order)
                .map(|(f, _)| f)
                .unwrap_or(f64::INFINITY);
            let accept = loss < best_loss;
            CalibrationTrialEvent { trial, eta, loss, accepted: accept }.emit();
            if accept {
                best_loss = loss;
                best_eta = eta;
                accepted += 1;
            } else {
                break;
            }
            if accepted >= candidates as u32 {
                break;
            }
        }
        if accepted >= candidates as u32 {
            break;
        }
    }

    best_eta
}

/// Runs SGD to convergence (or `sgd.max_iterations`), returning the final
/// weight vector.
pub fn run(encoder: &mut Encoder, params: &ParamTable) -> Result<Vec<f64>> {
    let n = encoder.num_features();
    let sigma = params.get_f64("regularization.sigma").max(1e-12);
    let num_instances = encoder.num_training_instances().max(1);
    let lambda = 1.0 / (sigma * sigma * num_instances as f64);
    let max_iterations = params.get_i64("sgd.max_iterations").max(1) as u64;
    let period = params.get_i64("sgd.period").max(1) as usize;
    let delta = params.get_f64("sgd.delta");
    let seed = params.get_i64("sgd.seed") as u64;

    let mut rng = StdRng::seed_from_u64(seed);
    let best_eta = calibrate(encoder, params, &mut rng);
    let t0 = 1.0 / (lambda * best_eta);

    let mut w = vec![0.0f64; n];
    let mut t = 0.0f64;
    let mut recent_losses: Vec<f64> = Vec::new();
    let start = std::time::Duration::ZERO;

    for iteration in 0..max_iterations {
        let mut order: Vec<usize> = (0..encoder.num_training_instances()).collect();
        order.shuffle(&mut rng);

        let (loss, new_t) = epoch(encoder, &mut w, lambda, t0, t, &order)?;
        t = new_t;

        let reg_term = 0.5 * lambda * vecnorm2(&w) * num_instances as f64;
        let total = loss + reg_term;
        recent_losses.push(total);

        TrainingEvent {
            iteration,
            loss: total,
            feature_norm: vecnorm2(&w).sqrt(),
            gradient_norm: None,
            elapsed: start,
            holdout_accuracy: None,
        }
        .emit();

        if recent_losses.len() > period {
            let old = recent_losses[recent_losses.len() - period - 1];
            let improvement = (old - total).abs() / old.max(1e-12);
            if improvement < delta {
                break;
            }
        }
    }

    Ok(w)
}
