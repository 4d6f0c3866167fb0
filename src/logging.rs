//! Structured training diagnostics.
//!
//! `original_source`'s drivers push progress through a var-args
//! `logging()` callback (format string + values). Per the Design Notes,
//! this is replaced with a plain struct emitted through `tracing`, the
//! way `ner-core::pipeline::PipelineEvent` structures its own progress
//! events -- formatting is left to whatever `tracing` subscriber the
//! caller installs.

use std::time::Duration;

/// One reported point during training: an iteration/epoch boundary, or a
/// calibration trial.
#[derive(Debug, Clone)]
pub struct TrainingEvent {
    pub iteration: u64,
    pub loss: f64,
    pub feature_norm: f64,
    pub gradient_norm: Option<f64>,
    pub elapsed: Duration,
    pub holdout_accuracy: Option<f64>,
}

impl TrainingEvent {
    pub fn emit(&self) {
        tracing::info!(
            iteration = self.iteration,
            loss = self.loss,
            feature_norm = self.feature_norm,
            gradient_norm = self.gradient_norm,
            elapsed_ms = self.elapsed.as_millis() as u64,
            holdout_accuracy = self.holdout_accuracy,
            "training progress"
        );
    }
}

/// Emitted once per SGD learning-rate calibration trial.
#[derive(Debug, Clone)]
pub struct CalibrationTrialEvent {
    pub trial: u32,
    pub eta: f64,
    pub loss: f64,
    pub accepted: bool,
}

impl CalibrationTrialEvent {
    pub fn emit(&self) {
        tracing::debug!(
            trial = self.trial,
            eta = self.eta,
            loss = self.loss,
            accepted = self.accepted,
            "sgd calibration trial"
        );
    }
}
