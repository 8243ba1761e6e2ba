use std::{fmt, str::FromStr};

use ndarray::{Array2, ArrayView1};

use super::{
    func::nearest, require_fitted, require_rows, require_width, Contamination, Detector, Fitted,
};
use crate::{
    dataset::Dataset,
    errors::{EngineError, EngineResult},
};

const FAMILY: &str = "knn";

/// How neighbour distances collapse into one score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnnMethod {
    /// Distance to the k-th neighbour.
    Largest,
    /// Mean distance to the k neighbours.
    Mean,
    /// Median distance to the k neighbours.
    Median,
}

impl KnnMethod {
    fn collapse(self, distances: &[f64]) -> f64 {
        match self {
            Self::Largest => distances.last().copied().unwrap_or(0.0),
            Self::Mean => distances.iter().sum::<f64>() / distances.len().max(1) as f64,
            Self::Median => super::func::quantile(distances, 0.5),
        }
    }
}

impl fmt::Display for KnnMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Largest => "largest",
            Self::Mean => "mean",
            Self::Median => "median",
        })
    }
}

impl FromStr for KnnMethod {
    type Err = EngineError;

    fn from_str(raw: &str) -> EngineResult<Self> {
        match raw {
            "largest" => Ok(Self::Largest),
            "mean" => Ok(Self::Mean),
            "median" => Ok(Self::Median),
            other => Err(EngineError::Configuration(format!(
                "unknown knn method `{other}`"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Reference {
    rows: Array2<f64>,
    k: usize,
}

impl Reference {
    fn score(&self, point: ArrayView1<'_, f64>, method: KnnMethod) -> f64 {
        let distances: Vec<f64> = nearest(self.rows.view(), point, self.k, true)
            .into_iter()
            .map(|(_, dist)| dist)
            .collect();
        method.collapse(&distances)
    }
}

/// k-nearest-neighbour distance detector.
#[derive(Debug, Clone)]
pub struct Knn {
    n_neighbors: usize,
    method: KnnMethod,
    contamination: Contamination,
    fitted: Option<Fitted<Reference>>,
}

impl Knn {
    /// Creates an unfitted detector.
    #[must_use]
    pub fn new(n_neighbors: usize, method: KnnMethod, contamination: Contamination) -> Self {
        Self {
            n_neighbors: n_neighbors.max(1),
            method,
            contamination,
            fitted: None,
        }
    }
}

impl Detector for Knn {
    fn family(&self) -> &'static str {
        FAMILY
    }

    fn fit(&mut self, data: &Dataset) -> EngineResult<()> {
        require_rows(data, 2, FAMILY)?;
        let reference = Reference {
            rows: data.view().to_owned(),
            k: self.n_neighbors.min(data.n_rows() - 1),
        };
        let scores: Vec<f64> = reference
            .rows
            .outer_iter()
            .map(|row| reference.score(row, self.method))
            .collect();
        let threshold = self.contamination.threshold(&scores);
        self.fitted = Some(Fitted {
            state: reference,
            threshold,
        });
        Ok(())
    }

    fn decision_function(&self, data: &Dataset) -> EngineResult<Vec<f64>> {
        let fitted = require_fitted(&self.fitted, FAMILY)?;
        require_width(data, fitted.state.rows.ncols(), FAMILY)?;
        Ok(data
            .view()
            .outer_iter()
            .map(|row| fitted.state.score(row, self.method))
            .collect())
    }

    fn threshold(&self) -> EngineResult<f64> {
        Ok(require_fitted(&self.fitted, FAMILY)?.threshold)
    }

    fn describe(&self) -> String {
        format!(
            "KNN(contamination={}, method='{}', n_neighbors={})",
            self.contamination.value(),
            self.method,
            self.n_neighbors
        )
    }
}
