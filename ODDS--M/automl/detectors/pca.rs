use ndarray::{Array1, Array2, ArrayView2};

use super::{
    func::{column_moments, covariance, standardize, symmetric_eigen},
    require_fitted, require_rows, require_width, Contamination, Detector, Fitted,
};
use crate::{dataset::Dataset, errors::EngineResult};

const FAMILY: &str = "pca";

#[derive(Debug, Clone, PartialEq)]
struct Projection {
    mean: Array1<f64>,
    std: Array1<f64>,
    components: Array2<f64>,
    variances: Array1<f64>,
    /// Components whose weighted squared projections form the score.
    scored: Vec<usize>,
}

impl Projection {
    fn scores(&self, data: ArrayView2<'_, f64>) -> Vec<f64> {
        let projected = standardize(data, &self.mean, &self.std).dot(&self.components);
        projected
            .outer_iter()
            .map(|row| {
                self.scored
                    .iter()
                    .map(|&j| row[j].powi(2) / self.variances[j])
                    .sum()
            })
            .collect()
    }
}

/// Distance in the minor principal subspace, weighted by inverse component variance.
///
/// The leading `n_components` directions describe normal behaviour; the score sums the
/// squared, variance-scaled projections on the remaining directions. When every
/// direction is retained the score degrades to the full Mahalanobis distance.
#[derive(Debug, Clone)]
pub struct Pca {
    n_components: usize,
    contamination: Contamination,
    fitted: Option<Fitted<Projection>>,
}

impl Pca {
    /// Creates an unfitted detector.
    #[must_use]
    pub fn new(n_components: usize, contamination: Contamination) -> Self {
        Self {
            n_components: n_components.max(1),
            contamination,
            fitted: None,
        }
    }
}

impl Detector for Pca {
    fn family(&self) -> &'static str {
        FAMILY
    }

    fn fit(&mut self, data: &Dataset) -> EngineResult<()> {
        require_rows(data, 2, FAMILY)?;
        let view = data.view();
        let (mean, std) = column_moments(view);
        let standardized = standardize(view, &mean, &std);
        let (eigenvalues, components) =
            symmetric_eigen(&covariance(standardized.view(), &Array1::zeros(data.n_features())));
        let floor = eigenvalues.first().copied().unwrap_or(0.0).max(1.0) * 1e-9;
        let variances = eigenvalues.mapv(|v| v.max(floor));
        let width = data.n_features();
        let kept = self.n_components.min(width);
        let scored = if kept < width {
            (kept..width).collect()
        } else {
            (0..width).collect()
        };
        let projection = Projection {
            mean,
            std,
            components,
            variances,
            scored,
        };
        let threshold = self.contamination.threshold(&projection.scores(view));
        self.fitted = Some(Fitted {
            state: projection,
            threshold,
        });
        Ok(())
    }

    fn decision_function(&self, data: &Dataset) -> EngineResult<Vec<f64>> {
        let fitted = require_fitted(&self.fitted, FAMILY)?;
        require_width(data, fitted.state.mean.len(), FAMILY)?;
        Ok(fitted.state.scores(data.view()))
    }

    fn threshold(&self) -> EngineResult<f64> {
        Ok(require_fitted(&self.fitted, FAMILY)?.threshold)
    }

    fn describe(&self) -> String {
        format!(
            "PCA(contamination={}, n_components={}, standardization=True, weighted=True)",
            self.contamination.value(),
            self.n_components
        )
    }
}
