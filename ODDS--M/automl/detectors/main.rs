//! Candidate anomaly detectors and the contract they share.

/// Cluster-based local outlier factor.
pub mod cblof;
/// Histogram-based outlier score.
pub mod hbos;
/// Isolation forest.
pub mod iforest;
/// k-nearest-neighbour distance.
pub mod knn;
/// Local outlier factor.
pub mod lof;
/// One-class support vector machine.
pub mod ocsvm;
/// Principal-component residual distance.
pub mod pca;
/// Robust covariance (MCD-style) Mahalanobis distance.
pub mod covariance;
/// Subspace outlier degree.
pub mod sod;
/// Numeric helpers shared by the detectors.
pub mod func;

use std::fmt;

use crate::{
    dataset::Dataset,
    errors::{EngineError, EngineResult},
};

pub use cblof::Cblof;
pub use covariance::RobustCovariance;
pub use hbos::Hbos;
pub use iforest::IsolationForest;
pub use knn::{Knn, KnnMethod};
pub use lof::Lof;
pub use ocsvm::OneClassSvm;
pub use pca::Pca;
pub use sod::Sod;

/// Contract shared by every candidate family.
///
/// Scores follow the "higher = more anomalous" convention. `predict` flags rows whose
/// score exceeds the threshold learned at fit time.
pub trait Detector: fmt::Debug + Send {
    /// Family identifier, e.g. `iforest`.
    fn family(&self) -> &'static str;

    /// Trains on `data`, replacing any previous state.
    fn fit(&mut self, data: &Dataset) -> EngineResult<()>;

    /// Continuous outlier scores, one per row.
    fn decision_function(&self, data: &Dataset) -> EngineResult<Vec<f64>>;

    /// Binary labels (1 = anomaly), one per row.
    fn predict(&self, data: &Dataset) -> EngineResult<Vec<u8>> {
        let threshold = self.threshold()?;
        Ok(self
            .decision_function(data)?
            .into_iter()
            .map(|score| u8::from(score > threshold))
            .collect())
    }

    /// Decision threshold learned by `fit`.
    fn threshold(&self) -> EngineResult<f64>;

    /// Human-readable descriptor including hyperparameters.
    fn describe(&self) -> String;
}

/// Fraction of training rows expected to be anomalous; sets the decision threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contamination(f64);

impl Contamination {
    /// Default used when a configuration omits the parameter.
    pub const DEFAULT: Self = Self(0.05);

    /// Accepts values in (0, 0.5].
    pub fn new(value: f64) -> EngineResult<Self> {
        if value > 0.0 && value <= 0.5 {
            Ok(Self(value))
        } else {
            Err(EngineError::Configuration(format!(
                "contamination {value} outside (0, 0.5]"
            )))
        }
    }

    /// Raw fraction.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// Score above which a training row counts as anomalous.
    #[must_use]
    pub fn threshold(self, training_scores: &[f64]) -> f64 {
        func::quantile(training_scores, 1.0 - self.0)
    }
}

impl Default for Contamination {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Learned state common to all detectors: the training threshold.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Fitted<S> {
    pub(crate) state: S,
    pub(crate) threshold: f64,
}

pub(crate) fn require_fitted<'a, S>(
    fitted: &'a Option<Fitted<S>>,
    family: &str,
) -> EngineResult<&'a Fitted<S>> {
    fitted.as_ref().ok_or_else(|| EngineError::NotFitted {
        family: family.to_string(),
    })
}

pub(crate) fn require_rows(data: &Dataset, min: usize, family: &str) -> EngineResult<()> {
    if data.n_rows() < min {
        return Err(EngineError::fit(
            family,
            format!("needs at least {min} rows, got {}", data.n_rows()),
        ));
    }
    Ok(())
}

pub(crate) fn require_width(data: &Dataset, expected: usize, family: &str) -> EngineResult<()> {
    if data.n_features() == expected {
        Ok(())
    } else {
        Err(EngineError::shape(
            format!("{family} feature count"),
            expected,
            data.n_features(),
        ))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contamination_bounds() {
        assert!(Contamination::new(0.0).is_err());
        assert!(Contamination::new(0.6).is_err());
        assert_eq!(Contamination::new(0.1).unwrap().value(), 0.1);
    }

    #[test]
    fn threshold_sits_at_upper_quantile() {
        let scores: Vec<f64> = (0..=100).map(f64::from).collect();
        let threshold = Contamination::new(0.05).unwrap().threshold(&scores);
        assert!((threshold - 95.0).abs() < 1e-9);
    }
}
