use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use super::{
    func::{covariance, invert},
    require_fitted, require_rows, require_width, Contamination, Detector, Fitted,
};
use crate::{
    dataset::Dataset,
    errors::{EngineError, EngineResult},
};

const FAMILY: &str = "robustcovariance";
const MAX_C_STEPS: usize = 30;

#[derive(Debug, Clone, PartialEq)]
struct Location {
    mean: Array1<f64>,
    precision: Array2<f64>,
}

impl Location {
    fn estimate(data: ArrayView2<'_, f64>, rows: &[usize]) -> EngineResult<Self> {
        let subset = data.select(Axis(0), rows);
        let mean = subset.sum_axis(Axis(0)) / rows.len().max(1) as f64;
        let precision = invert(&covariance(subset.view(), &mean)).ok_or_else(|| {
            EngineError::fit(FAMILY, format!("covariance of {} rows is singular", rows.len()))
        })?;
        Ok(Self { mean, precision })
    }

    fn mahalanobis(&self, point: ArrayView1<'_, f64>) -> f64 {
        let centered = &point - &self.mean;
        centered.dot(&self.precision.dot(&centered))
    }

    fn distances(&self, data: ArrayView2<'_, f64>) -> Vec<f64> {
        data.outer_iter().map(|row| self.mahalanobis(row)).collect()
    }
}

/// Mahalanobis distance under a minimum-covariance-determinant style estimate.
///
/// Concentration steps repeatedly refit mean and covariance on the `h` rows closest to
/// the current estimate, so a minority of outliers cannot inflate the covariance.
#[derive(Debug, Clone)]
pub struct RobustCovariance {
    support_fraction: f64,
    contamination: Contamination,
    fitted: Option<Fitted<Location>>,
}

impl RobustCovariance {
    /// Creates an unfitted estimator. `support_fraction` is clamped to [0.5, 1].
    #[must_use]
    pub fn new(support_fraction: f64, contamination: Contamination) -> Self {
        Self {
            support_fraction: support_fraction.clamp(0.5, 1.0),
            contamination,
            fitted: None,
        }
    }

    fn support(&self, rows: usize, width: usize) -> usize {
        let h = (self.support_fraction * rows as f64).ceil() as usize;
        h.max(width + 1).min(rows)
    }
}

impl Detector for RobustCovariance {
    fn family(&self) -> &'static str {
        FAMILY
    }

    fn fit(&mut self, data: &Dataset) -> EngineResult<()> {
        require_rows(data, data.n_features() + 2, FAMILY)?;
        let view = data.view();
        let h = self.support(data.n_rows(), data.n_features());
        let all: Vec<usize> = (0..data.n_rows()).collect();
        let mut location = Location::estimate(view, &all)?;
        let mut support: Vec<usize> = Vec::new();
        for _ in 0..MAX_C_STEPS {
            let distances = location.distances(view);
            let mut order = all.clone();
            order.sort_by(|&a, &b| distances[a].total_cmp(&distances[b]).then(a.cmp(&b)));
            order.truncate(h);
            order.sort_unstable();
            if order == support {
                break;
            }
            location = Location::estimate(view, &order)?;
            support = order;
        }
        let threshold = self.contamination.threshold(&location.distances(view));
        self.fitted = Some(Fitted {
            state: location,
            threshold,
        });
        Ok(())
    }

    fn decision_function(&self, data: &Dataset) -> EngineResult<Vec<f64>> {
        let fitted = require_fitted(&self.fitted, FAMILY)?;
        require_width(data, fitted.state.mean.len(), FAMILY)?;
        Ok(fitted.state.distances(data.view()))
    }

    fn threshold(&self) -> EngineResult<f64> {
        Ok(require_fitted(&self.fitted, FAMILY)?.threshold)
    }

    fn describe(&self) -> String {
        format!(
            "MCD(contamination={}, support_fraction={:.3}, assume_centered=False)",
            self.contamination.value(),
            self.support_fraction
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::fixtures::{clustered_with_outliers, top_scored, OUTLIERS};

    #[test]
    fn outliers_have_largest_distance() {
        let data = clustered_with_outliers();
        let mut mcd = RobustCovariance::new(0.75, Contamination::DEFAULT);
        mcd.fit(&data).unwrap();
        let scores = mcd.decision_function(&data).unwrap();
        assert_eq!(top_scored(&scores, 3), OUTLIERS.to_vec());
        let labels = mcd.predict(&data).unwrap();
        assert!(OUTLIERS.iter().all(|&idx| labels[idx] == 1));
    }

    #[test]
    fn collinear_features_fail_to_fit() {
        let rows: Vec<Vec<f64>> = (0..10)
            .map(|i| {
                let v = f64::from(i);
                vec![v, 2.0 * v]
            })
            .collect();
        let data = Dataset::from_rows(&rows).unwrap();
        let err = RobustCovariance::new(0.8, Contamination::DEFAULT)
            .fit(&data)
            .unwrap_err();
        assert!(matches!(err, EngineError::ModelFit { .. }));
    }

    #[test]
    fn support_never_below_width_plus_one() {
        let mcd = RobustCovariance::new(0.5, Contamination::DEFAULT);
        assert_eq!(mcd.support(4, 3), 4);
        assert_eq!(mcd.support(100, 2), 50);
    }
}
