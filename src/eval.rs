//! Per-label and macro precision/recall/F1, plus token and sequence
//! accuracy ([SUPPLEMENT] in SPEC_FULL.md -- spec.md's size-budget table
//! names this component but never specifies it in §4; grounded on the
//! `holdout_evaluation(...)` call sites referenced from every training
//! driver in `original_source`, e.g. `train_l2sgd.c`).

use std::collections::HashMap;

/// Confusion counts accumulated for a single label: true positives, false
/// positives, and false negatives against the gold sequence set.
#[derive(Debug, Clone, Copy, Default)]
struct LabelCounts {
    tp: u64,
    fp: u64,
    fn_: u64,
}

impl LabelCounts {
    fn precision(&self) -> f64 {
        if self.tp + self.fp == 0 {
            0.0
        } else {
            self.tp as f64 / (self.tp + self.fp) as f64
        }
    }

    fn recall(&self) -> f64 {
        if self.tp + self.fn_ == 0 {
            0.0
        } else {
            self.tp as f64 / (self.tp + self.fn_) as f64
        }
    }

    fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

/// Per-label precision/recall/F1 plus macro averages and accuracies,
/// computed by comparing predicted label sequences against gold ones.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    counts: HashMap<u32, LabelCounts>,
    tokens_total: u64,
    tokens_correct: u64,
    sequences_total: u64,
    sequences_correct: u64,
}

impl Evaluation {
    pub fn new() -> Self {
        Evaluation::default()
    }

    /// Folds one (gold, predicted) pair of equal-length label sequences
    /// into the running counts.
    pub fn add_sequence(&mut self, gold: &[u32], predicted: &[u32]) {
        debug_assert_eq!(gold.len(), predicted.len());
        self.sequences_total += 1;
        let mut all_match = true;

        for (&g, &p) in gold.iter().zip(predicted) {
            self.tokens_total += 1;
            if g == p {
                self.tokens_correct += 1;
                self.counts.entry(g).or_default().tp += 1;
            } else {
                all_match = false;
                self.counts.entry(p).or_default().fp += 1;
                self.counts.entry(g).or_default().fn_ += 1;
            }
        }
        if all_match {
            self.sequences_correct += 1;
        }
    }

    pub fn token_accuracy(&self) -> f64 {
        if self.tokens_total == 0 {
            0.0
        } else {
            self.tokens_correct as f64 / self.tokens_total as f64
        }
    }

    pub fn sequence_accuracy(&self) -> f64 {
        if self.sequences_total == 0 {
            0.0
        } else {
            self.sequences_correct as f64 / self.sequences_total as f64
        }
    }

    pub fn precision(&self, label: u32) -> f64 {
        self.counts.get(&label).map(LabelCounts::precision).unwrap_or(0.0)
    }

    pub fn recall(&self, label: u32) -> f64 {
        self.counts.get(&label).map(LabelCounts::recall).unwrap_or(0.0)
    }

    pub fn f1(&self, label: u32) -> f64 {
        self.counts.get(&label).map(LabelCounts::f1).unwrap_or(0.0)
    }

    /// Unweighted mean of per-label F1 across every label that appeared
    /// as gold or predicted at least once.
    pub fn macro_f1(&self) -> f64 {
        if self.counts.is_empty() {
            return 0.0;
        }
        self.counts.values().map(LabelCounts::f1).sum::<f64>() / self.counts.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions_yield_accuracy_one() {
        let mut eval = Evaluation::new();
        eval.add_sequence(&[0, 1, 0], &[0, 1, 0]);
        eval.add_sequence(&[1, 1], &[1, 1]);
        assert_eq!(eval.token_accuracy(), 1.0);
        assert_eq!(eval.sequence_accuracy(), 1.0);
        assert_eq!(eval.f1(0), 1.0);
        assert_eq!(eval.f1(1), 1.0);
    }

    #[test]
    fn one_mismatch_fails_the_whole_sequence() {
        let mut eval = Evaluation::new();
        eval.add_sequence(&[0, 1, 0], &[0, 0, 0]);
        assert_eq!(eval.sequence_accuracy(), 0.0);
        assert!((eval.token_accuracy() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn precision_recall_reflect_false_positives_and_negatives() {
        let mut eval = Evaluation::new();
        // label 1 predicted once correctly, once as a false positive for
        // a gold label 0 position.
        eval.add_sequence(&[1, 0], &[1, 1]);
        assert_eq!(eval.recall(1), 1.0);
        assert!((eval.precision(1) - 0.5).abs() < 1e-12);
    }
}
