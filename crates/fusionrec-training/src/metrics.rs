//! Evaluation metrics: ranking AUC and per-sample scoring.

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, ModelResult};

/// Ranking-based ROC AUC over binary labels and predicted probabilities.
///
/// Scans predictions in descending order and accumulates the trapezoid
/// under the TP/FP curve, handling tied probabilities by closing the
/// trapezoid only when the probability changes. When every label belongs to
/// one class the denominator `P * N` is zero and the result is NaN; that
/// propagates to the caller untouched.
pub fn roc_auc(labels: &[f32], probs: &[f32]) -> f64 {
    assert_eq!(
        labels.len(),
        probs.len(),
        "labels and probabilities must align"
    );
    if labels.is_empty() {
        return f64::NAN;
    }

    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[b].partial_cmp(&probs[a]).unwrap_or(std::cmp::Ordering::Equal));

    let mut area = 0.0f64;
    let mut tp = 0.0f64;
    let mut tp_prev = 0.0f64;
    let mut fp = 0.0f64;
    let mut fp_prev = 0.0f64;
    let mut last_prob = probs[order[0]] + 1.0;
    for &i in &order {
        if probs[i] != last_prob {
            area += (tp + tp_prev) * (fp - fp_prev) / 2.0;
            tp_prev = tp;
            fp_prev = fp;
            last_prob = probs[i];
        }
        if labels[i] == 1.0 {
            tp += 1.0;
        } else {
            fp += 1.0;
        }
    }
    area += (tp + tp_prev) * (fp - fp_prev) / 2.0;
    area / (tp * fp)
}

/// Per-sample evaluation metric.
///
/// A closed set resolved by name at configuration time; unknown names are
/// an error, never a silent default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Metric {
    /// Binary cross-entropy on predicted probabilities.
    LogLoss,
    /// Squared difference between label and probability.
    Mse,
    /// Binary cross-entropy computed from raw logits.
    LogLossWithLogits,
}

impl Metric {
    /// Resolves a metric name.
    ///
    /// Accepts exactly `logloss`, `mse`, `mean_squared_error`, and
    /// `logloss_with_logits`.
    pub fn from_name(name: &str) -> ModelResult<Self> {
        match name {
            "logloss" => Ok(Metric::LogLoss),
            "mse" | "mean_squared_error" => Ok(Metric::Mse),
            "logloss_with_logits" => Ok(Metric::LogLossWithLogits),
            other => Err(ModelError::UnknownMetric(other.to_string())),
        }
    }

    /// Per-sample score. `value` is the predicted probability for
    /// [`Metric::LogLoss`] and [`Metric::Mse`], and the raw logit for
    /// [`Metric::LogLossWithLogits`].
    pub fn score(&self, label: f32, value: f32) -> f64 {
        match self {
            Metric::LogLoss => {
                let p = value.clamp(1e-7, 1.0 - 1e-7) as f64;
                let y = label as f64;
                -(y * p.ln() + (1.0 - y) * (1.0 - p).ln())
            }
            Metric::Mse => {
                let d = (label - value) as f64;
                d * d
            }
            Metric::LogLossWithLogits => {
                // max(x, 0) - x*y + ln(1 + exp(-|x|)), the stable form.
                let x = value as f64;
                let y = label as f64;
                x.max(0.0) - x * y + (-x.abs()).exp().ln_1p()
            }
        }
    }

    /// Weighted mean score over a batch. `weights` of `None` means unit
    /// weights.
    pub fn mean_score(&self, labels: &[f32], values: &[f32], weights: Option<&[f32]>) -> f64 {
        assert_eq!(labels.len(), values.len(), "labels and values must align");
        if labels.is_empty() {
            return 0.0;
        }
        let total: f64 = labels
            .iter()
            .zip(values.iter())
            .enumerate()
            .map(|(i, (&y, &v))| {
                let w = weights.map_or(1.0, |w| w[i] as f64);
                w * self.score(y, v)
            })
            .sum();
        total / labels.len() as f64
    }
}

/// One evaluation record for logging and history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EvalRecord {
    /// Training loss at this checkpoint.
    pub loss: f64,
    /// Validation AUC, when a validation split was evaluated.
    pub auc: Option<f64>,
    /// Global step at which the record was taken.
    pub global_step: u64,
}

impl EvalRecord {
    /// Creates a record with the given loss and step.
    pub fn new(loss: f64, global_step: u64) -> Self {
        Self {
            loss,
            auc: None,
            global_step,
        }
    }

    /// Attaches a validation AUC.
    pub fn with_auc(mut self, auc: f64) -> Self {
        self.auc = Some(auc);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auc_perfect_ranking() {
        let auc = roc_auc(&[1.0, 0.0, 1.0, 0.0], &[0.9, 0.1, 0.8, 0.2]);
        assert!((auc - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_auc_reversed_ranking() {
        let auc = roc_auc(&[1.0, 0.0, 1.0, 0.0], &[0.1, 0.9, 0.2, 0.8]);
        assert!(auc.abs() < 1e-12);
    }

    #[test]
    fn test_auc_all_tied_is_half() {
        let auc = roc_auc(&[1.0, 0.0, 1.0, 0.0], &[0.5, 0.5, 0.5, 0.5]);
        assert!((auc - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_auc_partial_ranking() {
        // One inversion among 2x2 pairs: 3/4.
        let auc = roc_auc(&[1.0, 1.0, 0.0, 0.0], &[0.9, 0.4, 0.6, 0.2]);
        assert!((auc - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_auc_single_class_is_nan() {
        assert!(roc_auc(&[1.0, 1.0], &[0.3, 0.7]).is_nan());
        assert!(roc_auc(&[0.0, 0.0], &[0.3, 0.7]).is_nan());
    }

    #[test]
    fn test_metric_from_name() {
        assert_eq!(Metric::from_name("logloss").unwrap(), Metric::LogLoss);
        assert_eq!(Metric::from_name("mse").unwrap(), Metric::Mse);
        assert_eq!(
            Metric::from_name("mean_squared_error").unwrap(),
            Metric::Mse
        );
        assert_eq!(
            Metric::from_name("logloss_with_logits").unwrap(),
            Metric::LogLossWithLogits
        );
        assert!(matches!(
            Metric::from_name("accuracy"),
            Err(ModelError::UnknownMetric(_))
        ));
    }

    #[test]
    fn test_logloss_matches_closed_form() {
        let score = Metric::LogLoss.score(1.0, 0.5);
        assert!((score - std::f64::consts::LN_2).abs() < 1e-9);
        // Confident correct prediction scores near zero.
        assert!(Metric::LogLoss.score(1.0, 0.999) < 0.01);
    }

    #[test]
    fn test_logloss_with_logits_matches_probability_form() {
        for &(y, logit) in &[(1.0f32, 2.0f32), (0.0, -1.5), (1.0, -0.3)] {
            let p = 1.0 / (1.0 + (-logit).exp());
            let a = Metric::LogLossWithLogits.score(y, logit);
            let b = Metric::LogLoss.score(y, p);
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }
    }

    #[test]
    fn test_weighted_mean_score() {
        let labels = [1.0, 0.0];
        let probs = [0.5, 0.5];
        let unweighted = Metric::LogLoss.mean_score(&labels, &probs, None);
        let weighted = Metric::LogLoss.mean_score(&labels, &probs, Some(&[2.0, 0.0]));
        assert!((unweighted - std::f64::consts::LN_2).abs() < 1e-9);
        assert!((weighted - std::f64::consts::LN_2).abs() < 1e-9);
    }
}
