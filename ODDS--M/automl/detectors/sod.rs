use ndarray::{Array1, Array2, ArrayView1, Axis};

use super::{
    func::{nearest, sq_distance},
    require_fitted, require_rows, require_width, Contamination, Detector, Fitted,
};
use crate::{dataset::Dataset, errors::EngineResult};

const FAMILY: &str = "sod";

#[derive(Debug, Clone, PartialEq)]
struct SharedNeighbours {
    rows: Array2<f64>,
    k: usize,
    ref_set: usize,
    alpha: f64,
    neighbours: Vec<Vec<usize>>,
}

impl SharedNeighbours {
    /// Rows sharing the most k-nearest neighbours with `point`, best first.
    fn reference_set(&self, point: ArrayView1<'_, f64>) -> Vec<usize> {
        let own = self
            .rows
            .outer_iter()
            .position(|row| sq_distance(row, point) == 0.0);
        let mut marked = vec![false; self.rows.nrows()];
        for (idx, _) in nearest(self.rows.view(), point, self.k, true) {
            marked[idx] = true;
        }
        let mut shared: Vec<(usize, usize)> = self
            .neighbours
            .iter()
            .enumerate()
            .filter(|(idx, _)| Some(*idx) != own)
            .map(|(idx, theirs)| (idx, theirs.iter().filter(|&&n| marked[n]).count()))
            .collect();
        shared.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        shared.into_iter().take(self.ref_set).map(|(idx, _)| idx).collect()
    }

    fn score(&self, point: ArrayView1<'_, f64>) -> f64 {
        let reference = self.rows.select(Axis(0), &self.reference_set(point));
        let count = reference.nrows().max(1) as f64;
        let mean: Array1<f64> = reference.sum_axis(Axis(0)) / count;
        let variance: Array1<f64> = reference
            .outer_iter()
            .fold(Array1::<f64>::zeros(mean.len()), |acc, row| acc + (&row - &mean).mapv(|v| v * v))
            / count;
        let expected = self.alpha * variance.sum() / variance.len().max(1) as f64;
        let (deviation, relevant) = variance
            .iter()
            .zip(point.iter().zip(mean.iter()))
            .filter(|(var, _)| **var < expected)
            .fold((0.0, 0_usize), |(sum, dims), (_, (x, m))| (sum + (x - m).powi(2), dims + 1));
        if relevant == 0 {
            0.0
        } else {
            deviation.sqrt() / relevant as f64
        }
    }
}

/// Subspace outlier degree: deviation from the shared-neighbour reference set, measured
/// only along the dimensions where that set is tight.
#[derive(Debug, Clone)]
pub struct Sod {
    n_neighbors: usize,
    ref_set: usize,
    alpha: f64,
    contamination: Contamination,
    fitted: Option<Fitted<SharedNeighbours>>,
}

impl Sod {
    /// Creates an unfitted detector. `ref_set` is capped at `n_neighbors`.
    #[must_use]
    pub fn new(n_neighbors: usize, ref_set: usize, alpha: f64, contamination: Contamination) -> Self {
        let n_neighbors = n_neighbors.max(2);
        Self {
            n_neighbors,
            ref_set: ref_set.clamp(1, n_neighbors),
            alpha,
            contamination,
            fitted: None,
        }
    }
}

impl Detector for Sod {
    fn family(&self) -> &'static str {
        FAMILY
    }

    fn fit(&mut self, data: &Dataset) -> EngineResult<()> {
        require_rows(data, 3, FAMILY)?;
        let rows = data.view().to_owned();
        let k = self.n_neighbors.min(data.n_rows() - 1);
        let neighbours: Vec<Vec<usize>> = rows
            .outer_iter()
            .map(|row| {
                nearest(rows.view(), row, k, true)
                    .into_iter()
                    .map(|(idx, _)| idx)
                    .collect()
            })
            .collect();
        let state = SharedNeighbours {
            k,
            ref_set: self.ref_set.min(data.n_rows() - 1),
            alpha: self.alpha,
            neighbours,
            rows,
        };
        let scores: Vec<f64> = state.rows.outer_iter().map(|row| state.score(row)).collect();
        let threshold = self.contamination.threshold(&scores);
        self.fitted = Some(Fitted { state, threshold });
        Ok(())
    }

    fn decision_function(&self, data: &Dataset) -> EngineResult<Vec<f64>> {
        let fitted = require_fitted(&self.fitted, FAMILY)?;
        require_width(data, fitted.state.rows.ncols(), FAMILY)?;
        Ok(data
            .view()
            .outer_iter()
            .map(|row| fitted.state.score(row))
            .collect())
    }

    fn threshold(&self) -> EngineResult<f64> {
        Ok(require_fitted(&self.fitted, FAMILY)?.threshold)
    }

    fn describe(&self) -> String {
        format!(
            "SOD(alpha={:.4}, contamination={}, n_neighbors={}, ref_set={})",
            self.alpha,
            self.contamination.value(),
            self.n_neighbors,
            self.ref_set
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{detectors::fixtures::top_scored, errors::EngineError};

    /// Tight in the first two dimensions, spread along the third; the last row breaks
    /// away in the first dimension only.
    fn subspace_outlier() -> Dataset {
        let mut rows: Vec<Vec<f64>> = (0..40_u32)
            .map(|i| {
                vec![
                    0.01 * f64::from(i % 3),
                    0.01 * f64::from(i % 2),
                    0.25 * f64::from(i),
                ]
            })
            .collect();
        rows.push(vec![5.0, 0.0, 5.1]);
        Dataset::from_rows(&rows).unwrap()
    }

    #[test]
    fn deviation_in_a_tight_subspace_ranks_first() {
        let data = subspace_outlier();
        let mut sod = Sod::new(10, 5, 0.8, Contamination::DEFAULT);
        sod.fit(&data).unwrap();
        let scores = sod.decision_function(&data).unwrap();
        assert_eq!(top_scored(&scores, 1), vec![40]);
        assert!(scores[40] > 2.0, "{}", scores[40]);
        assert!(scores[..40].iter().all(|score| *score < 0.1));
        assert_eq!(sod.predict(&data).unwrap()[40], 1);
    }

    #[test]
    fn reference_set_excludes_the_row_itself() {
        let data = subspace_outlier();
        let mut sod = Sod::new(10, 5, 0.8, Contamination::DEFAULT);
        sod.fit(&data).unwrap();
        let state = &sod.fitted.as_ref().unwrap().state;
        let reference = state.reference_set(data.view().row(20));
        assert_eq!(reference.len(), 5);
        assert!(!reference.contains(&20));
    }

    #[test]
    fn single_dimension_has_no_tight_subspace() {
        let data = Dataset::from_rows(&[vec![0.0], vec![1.0], vec![2.0], vec![50.0]]).unwrap();
        let mut sod = Sod::new(2, 2, 0.8, Contamination::DEFAULT);
        sod.fit(&data).unwrap();
        assert_eq!(sod.decision_function(&data).unwrap(), vec![0.0; 4]);
        let narrow = Dataset::from_rows(&[vec![0.0, 1.0]]).unwrap();
        assert!(matches!(
            sod.decision_function(&narrow).unwrap_err(),
            EngineError::DataShape { .. }
        ));
    }
}
