use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};

/// Binary confusion counts, anomaly (1) being the positive class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Anomalies flagged.
    pub true_positive: usize,
    /// Normal rows flagged.
    pub false_positive: usize,
    /// Normal rows passed.
    pub true_negative: usize,
    /// Anomalies missed.
    pub false_negative: usize,
}

impl ConfusionMatrix {
    /// Tallies predictions against truth; both must have equal length.
    pub fn from_labels(truth: &[u8], predicted: &[u8]) -> EngineResult<Self> {
        if truth.len() != predicted.len() {
            return Err(EngineError::shape(
                "predictions vs ground truth",
                truth.len(),
                predicted.len(),
            ));
        }
        let mut matrix = Self::default();
        for (&actual, &guess) in truth.iter().zip(predicted) {
            match (actual == 1, guess == 1) {
                (true, true) => matrix.true_positive += 1,
                (false, true) => matrix.false_positive += 1,
                (false, false) => matrix.true_negative += 1,
                (true, false) => matrix.false_negative += 1,
            }
        }
        Ok(matrix)
    }

    /// Total rows counted.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.true_positive + self.false_positive + self.true_negative + self.false_negative
    }

    /// Fraction of rows labelled correctly.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positive + self.true_negative, self.total())
    }

    /// `tp / (tp + fp)`, 0 when nothing is flagged.
    #[must_use]
    pub fn precision(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_positive)
    }

    /// `tp / (tp + fn)`, 0 when there are no anomalies.
    #[must_use]
    pub fn recall(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }

    /// Harmonic mean of precision and recall, 0 when both are 0.
    #[must_use]
    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Area under the ROC curve via the Mann-Whitney rank statistic (ties get average ranks).
///
/// Fails with `UndefinedMetric` for single-class labels or non-finite scores.
pub fn roc_auc(truth: &[u8], scores: &[f64]) -> EngineResult<f64> {
    if truth.len() != scores.len() {
        return Err(EngineError::shape(
            "scores vs ground truth",
            truth.len(),
            scores.len(),
        ));
    }
    let positives = truth.iter().filter(|&&label| label == 1).count();
    let negatives = truth.len() - positives;
    if positives == 0 || negatives == 0 {
        return Err(EngineError::undefined(
            "roc_auc",
            format!("ground truth has a single class ({positives} anomalies in {} rows)", truth.len()),
        ));
    }
    if let Some(pos) = scores.iter().position(|s| !s.is_finite()) {
        return Err(EngineError::undefined(
            "roc_auc",
            format!("score at row {pos} is not finite"),
        ));
    }
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));
    let mut ranks = vec![0.0; scores.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start;
        while end + 1 < order.len() && scores[order[end + 1]] == scores[order[start]] {
            end += 1;
        }
        // ranks are 1-based; a tied block shares its mean rank
        let rank = (start + end) as f64 / 2.0 + 1.0;
        for &idx in &order[start..=end] {
            ranks[idx] = rank;
        }
        start = end + 1;
    }
    let positive_rank_sum: f64 = truth
        .iter()
        .zip(&ranks)
        .filter(|&(&label, _)| label == 1)
        .map(|(_, rank)| rank)
        .sum();
    let (p, n) = (positives as f64, negatives as f64);
    Ok((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

/// Removes score-direction ambiguity: `max(auc, 1 - auc)`.
#[must_use]
pub fn polarity_corrected(auc: f64) -> f64 {
    auc.max(1.0 - auc)
}
