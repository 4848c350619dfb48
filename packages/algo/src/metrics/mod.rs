//! Epoch Metrics
//!
//! Predictions are collected over every valid (non-padding) timestep of an
//! epoch and summarised once at the end:
//! - Loss: mean binary cross-entropy
//! - Accuracy: share of predictions on the correct side of 0.5
//! - AUC: Mann-Whitney rank statistic, ties receive their average rank
//!
//! Every metric is optional. An empty log yields `None` everywhere and AUC is
//! also `None` when only one class was observed.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::sanitize::clamp_probability;
use crate::types::PREDICTION_THRESHOLD;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub loss: Option<f64>,
    pub accuracy: Option<f64>,
    pub auc: Option<f64>,
    /// Number of valid timesteps the metrics were computed over
    pub samples: usize,
}

/// Accumulates (prediction, target) pairs across batches.
#[derive(Clone, Debug, Default)]
pub struct PredictionLog {
    preds: Vec<f64>,
    targets: Vec<f64>,
}

impl PredictionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch; entries whose target is negative (padding) are skipped.
    pub fn extend_masked(&mut self, probs: &[f32], targets: &[f32]) {
        for (&p, &t) in probs.iter().zip(targets.iter()) {
            if t >= 0.0 {
                self.preds.push(p as f64);
                self.targets.push(t as f64);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.preds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.preds.is_empty()
    }

    pub fn summarize(&self) -> EpochMetrics {
        EpochMetrics {
            loss: binary_cross_entropy(&self.preds, &self.targets),
            accuracy: accuracy(&self.preds, &self.targets),
            auc: roc_auc(&self.preds, &self.targets),
            samples: self.len(),
        }
    }
}

pub fn binary_cross_entropy(preds: &[f64], targets: &[f64]) -> Option<f64> {
    if preds.is_empty() {
        return None;
    }
    let total: f64 = preds
        .iter()
        .zip(targets.iter())
        .map(|(&p, &t)| {
            let p = clamp_probability(p);
            -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
        })
        .sum();
    Some(total / preds.len() as f64)
}

pub fn accuracy(preds: &[f64], targets: &[f64]) -> Option<f64> {
    if preds.is_empty() {
        return None;
    }
    let hits = preds
        .iter()
        .zip(targets.iter())
        .filter(|(p, t)| (**p > PREDICTION_THRESHOLD) == (**t > PREDICTION_THRESHOLD))
        .count();
    Some(hits as f64 / preds.len() as f64)
}

pub fn roc_auc(preds: &[f64], targets: &[f64]) -> Option<f64> {
    let positives = targets.iter().filter(|&&t| t > PREDICTION_THRESHOLD).count();
    let negatives = targets.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut ranked: Vec<(f64, bool)> = preds
        .iter()
        .zip(targets.iter())
        .map(|(&p, &t)| (p, t > PREDICTION_THRESHOLD))
        .collect();
    ranked.par_sort_unstable_by(|a, b| a.0.total_cmp(&b.0));

    // 1-based ranks, tied scores share the mean of their rank span
    let mut positive_rank_sum = 0.0;
    let mut start = 0;
    while start < ranked.len() {
        let mut end = start + 1;
        while end < ranked.len() && ranked[end].0 == ranked[start].0 {
            end += 1;
        }
        let avg_rank = (start + 1 + end) as f64 / 2.0;
        let tied_positives = ranked[start..end].iter().filter(|(_, pos)| *pos).count();
        positive_rank_sum += avg_rank * tied_positives as f64;
        start = end;
    }

    let pos = positives as f64;
    let neg = negatives as f64;
    Some((positive_rank_sum - pos * (pos + 1.0) / 2.0) / (pos * neg))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auc_perfect_and_inverted() {
        let targets = [0.0, 0.0, 1.0, 1.0];
        assert_eq!(roc_auc(&[0.1, 0.2, 0.8, 0.9], &targets), Some(1.0));
        assert_eq!(roc_auc(&[0.9, 0.8, 0.2, 0.1], &targets), Some(0.0));
    }

    #[test]
    fn test_auc_counts_ties_as_half() {
        let auc = roc_auc(&[0.5, 0.5, 0.5, 0.5], &[0.0, 1.0, 0.0, 1.0]).unwrap();
        assert!((auc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_auc_matches_pairwise_definition() {
        let preds = [0.3, 0.7, 0.4, 0.4, 0.9, 0.1, 0.65];
        let targets = [0.0, 1.0, 1.0, 0.0, 1.0, 0.0, 0.0];
        let mut wins = 0.0;
        let mut pairs = 0.0;
        for (i, &ti) in targets.iter().enumerate() {
            for (j, &tj) in targets.iter().enumerate() {
                if ti == 1.0 && tj == 0.0 {
                    pairs += 1.0;
                    if preds[i] > preds[j] {
                        wins += 1.0;
                    } else if preds[i] == preds[j] {
                        wins += 0.5;
                    }
                }
            }
        }
        let auc = roc_auc(&preds, &targets).unwrap();
        assert!((auc - wins / pairs).abs() < 1e-12);
    }

    #[test]
    fn test_auc_undefined_for_single_class() {
        assert_eq!(roc_auc(&[0.2, 0.9], &[1.0, 1.0]), None);
        assert_eq!(roc_auc(&[], &[]), None);
    }

    #[test]
    fn test_accuracy_threshold() {
        let acc = accuracy(&[0.6, 0.4, 0.5, 0.9], &[1.0, 0.0, 1.0, 0.0]).unwrap();
        assert!((acc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_bce_known_value() {
        let loss = binary_cross_entropy(&[0.5, 0.5], &[1.0, 0.0]).unwrap();
        assert!((loss - std::f64::consts::LN_2).abs() < 1e-12);
    }

    #[test]
    fn test_bce_survives_saturated_predictions() {
        let loss = binary_cross_entropy(&[0.0, 1.0], &[1.0, 0.0]).unwrap();
        assert!(loss.is_finite());
    }

    #[test]
    fn test_log_skips_padding() {
        let mut log = PredictionLog::new();
        log.extend_masked(&[0.9, 0.1, 0.7], &[1.0, 0.0, -1.0]);
        assert_eq!(log.len(), 2);
        let metrics = log.summarize();
        assert_eq!(metrics.samples, 2);
        assert_eq!(metrics.accuracy, Some(1.0));
        assert_eq!(metrics.auc, Some(1.0));
    }

    #[test]
    fn test_all_padding_yields_empty_metrics() {
        let mut log = PredictionLog::new();
        log.extend_masked(&[0.3, 0.6], &[-1.0, -1.0]);
        let metrics = log.summarize();
        assert!(log.is_empty());
        assert_eq!(metrics, EpochMetrics::default());
    }
}
