use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};

/// Rectangular numeric feature table. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    features: Array2<f64>,
    columns: Vec<String>,
}

impl Dataset {
    /// Wraps a feature matrix. Rejects empty tables, mismatched column names and non-finite cells.
    pub fn new(features: Array2<f64>, columns: Vec<String>) -> EngineResult<Self> {
        let (rows, cols) = features.dim();
        if rows == 0 || cols == 0 {
            return Err(EngineError::Configuration(format!(
                "dataset must have at least one row and one column, got {rows}x{cols}"
            )));
        }
        if columns.len() != cols {
            return Err(EngineError::shape("column names vs feature columns", cols, columns.len()));
        }
        if let Some(((row, col), value)) = features.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(EngineError::Configuration(format!(
                "non-finite value {value} at row {row}, column `{}`",
                columns[col]
            )));
        }
        Ok(Self { features, columns })
    }

    /// Builds a dataset from row vectors, naming columns `x0`, `x1`, ...
    pub fn from_rows(rows: &[Vec<f64>]) -> EngineResult<Self> {
        let width = rows.first().map_or(0, Vec::len);
        let mut flat = Vec::with_capacity(rows.len() * width);
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != width {
                return Err(EngineError::shape(format!("row {idx} width"), width, row.len()));
            }
            flat.extend_from_slice(row);
        }
        let features = Array2::from_shape_vec((rows.len(), width), flat)
            .map_err(|err| EngineError::Configuration(err.to_string()))?;
        let columns = (0..width).map(|idx| format!("x{idx}")).collect();
        Self::new(features, columns)
    }

    /// Number of records.
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.features.nrows()
    }

    /// Number of feature columns.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    /// Column names in feature order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Borrowed feature matrix.
    #[must_use]
    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.features.view()
    }

    /// One record.
    #[must_use]
    pub fn row(&self, idx: usize) -> ArrayView1<'_, f64> {
        self.features.row(idx)
    }

    /// Copies the listed rows, in the given order, into a new dataset.
    pub fn select_rows(&self, indices: &[usize]) -> EngineResult<Self> {
        if let Some(&bad) = indices.iter().find(|&&idx| idx >= self.n_rows()) {
            return Err(EngineError::shape("row selection bound", self.n_rows(), bad + 1));
        }
        Self::new(
            self.features.select(Axis(0), indices),
            self.columns.clone(),
        )
    }
}

/// Binary anomaly labels (0 = normal, 1 = anomaly), one per dataset row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroundTruth(Vec<u8>);

impl GroundTruth {
    /// Validates that every label is 0 or 1.
    pub fn new(labels: Vec<u8>) -> EngineResult<Self> {
        if let Some(pos) = labels.iter().position(|&label| label > 1) {
            return Err(EngineError::Configuration(format!(
                "label {} at row {pos} is not binary",
                labels[pos]
            )));
        }
        Ok(Self(labels))
    }

    /// Number of labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when there are no labels.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw labels.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Count of rows labelled anomalous.
    #[must_use]
    pub fn anomalies(&self) -> usize {
        self.0.iter().filter(|&&label| label == 1).count()
    }

    /// True when only one class occurs (or there are no labels at all).
    #[must_use]
    pub fn is_single_class(&self) -> bool {
        let anomalies = self.anomalies();
        anomalies == 0 || anomalies == self.len()
    }

    /// Enforces one label per dataset row.
    pub fn check_against(&self, data: &Dataset) -> EngineResult<()> {
        if self.len() == data.n_rows() {
            Ok(())
        } else {
            Err(EngineError::shape(
                "ground truth length vs dataset rows",
                data.n_rows(),
                self.len(),
            ))
        }
    }

    /// Labels of the listed rows.
    #[must_use]
    pub fn select(&self, indices: &[usize]) -> Self {
        Self(indices.iter().filter_map(|&idx| self.0.get(idx).copied()).collect())
    }
}

/// How search trials split data between fitting and scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Validation {
    /// Fit and score on every row.
    #[default]
    FullData,
    /// Fit on the leading rows, score on the trailing `ratio` of rows.
    Holdout {
        /// Fraction of rows used for scoring, in (0, 0.9].
        ratio: f64,
    },
}

impl Validation {
    /// Row indices used for fitting and for scoring.
    pub fn split(self, rows: usize) -> EngineResult<(Vec<usize>, Vec<usize>)> {
        match self {
            Self::FullData => {
                let all: Vec<usize> = (0..rows).collect();
                Ok((all.clone(), all))
            }
            Self::Holdout { ratio } => {
                if !(ratio > 0.0 && ratio <= 0.9) {
                    return Err(EngineError::Configuration(format!(
                        "holdout ratio {ratio} outside (0, 0.9]"
                    )));
                }
                let held = ((rows as f64) * ratio).round() as usize;
                let held = held.clamp(1, rows.saturating_sub(2).max(1));
                let cut = rows.saturating_sub(held);
                if cut < 2 {
                    return Err(EngineError::shape(
                        format!("holdout training rows (minimum) of a {rows}-row dataset"),
                        2,
                        cut,
                    ));
                }
                Ok(((0..cut).collect(), (cut..rows).collect()))
            }
        }
    }

    /// Short label used in logs.
    #[must_use]
    pub fn describe(self) -> String {
        match self {
            Self::FullData => "full".into(),
            Self::Holdout { ratio } => format!("holdout({ratio:.2})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn rejects_non_finite_cells() {
        let err = Dataset::new(array![[1.0, f64::NAN]], vec!["a".into(), "b".into()]).unwrap_err();
        assert!(err.to_string().contains("column `b`"));
    }

    #[test]
    fn from_rows_rejects_ragged_input() {
        let err = Dataset::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert!(matches!(err, EngineError::DataShape { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn select_rows_keeps_columns() {
        let data = Dataset::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0], vec![5.0, 6.0]]).unwrap();
        let picked = data.select_rows(&[2, 0]).unwrap();
        assert_eq!(picked.n_rows(), 2);
        assert_eq!(picked.row(0)[1], 6.0);
        assert_eq!(picked.columns(), data.columns());
        assert!(data.select_rows(&[3]).is_err());
    }

    #[test]
    fn ground_truth_length_must_match_rows() {
        let rows: Vec<Vec<f64>> = (0..100).map(|i| vec![f64::from(i)]).collect();
        let data = Dataset::from_rows(&rows).unwrap();
        let labels = GroundTruth::new(vec![0; 99]).unwrap();
        let err = labels.check_against(&data).unwrap_err();
        assert!(matches!(err, EngineError::DataShape { expected: 100, actual: 99, .. }));
    }

    #[test]
    fn detects_single_class_labels() {
        assert!(GroundTruth::new(vec![0, 0, 0]).unwrap().is_single_class());
        assert!(GroundTruth::new(vec![1, 1]).unwrap().is_single_class());
        assert!(!GroundTruth::new(vec![0, 1]).unwrap().is_single_class());
        assert!(GroundTruth::new(vec![0, 2]).is_err());
    }

    #[test]
    fn holdout_split_is_time_ordered() {
        let (train, valid) = Validation::Holdout { ratio: 0.25 }.split(100).unwrap();
        assert_eq!(train.len(), 75);
        assert_eq!(valid.first(), Some(&75));
        assert!(matches!(
            Validation::Holdout { ratio: 0.95 }.split(100),
            Err(EngineError::Configuration(_))
        ));
        let too_small = Validation::Holdout { ratio: 0.25 }.split(2).unwrap_err();
        assert!(matches!(too_small, EngineError::DataShape { expected: 2, actual: 1, .. }));
        assert!(too_small.is_dataset_scoped());
        let (fit, score) = Validation::FullData.split(4).unwrap();
        assert_eq!(fit, score);
    }
}
