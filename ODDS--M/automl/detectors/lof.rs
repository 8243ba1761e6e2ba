use ndarray::{Array2, ArrayView1};

use super::{
    func::nearest, require_fitted, require_rows, require_width, Contamination, Detector, Fitted,
};
use crate::{dataset::Dataset, errors::EngineResult};

const FAMILY: &str = "lof";
const DENSITY_EPS: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq)]
struct Neighbourhood {
    reference: Array2<f64>,
    k: usize,
    k_distance: Vec<f64>,
    lrd: Vec<f64>,
}

impl Neighbourhood {
    fn local_density(&self, neighbours: &[(usize, f64)]) -> f64 {
        let reach = neighbours
            .iter()
            .map(|&(idx, dist)| dist.max(self.k_distance[idx]))
            .sum::<f64>()
            / neighbours.len() as f64;
        1.0 / (reach + DENSITY_EPS)
    }

    fn factor(&self, point: ArrayView1<'_, f64>) -> f64 {
        let neighbours = nearest(self.reference.view(), point, self.k, true);
        let own = self.local_density(&neighbours);
        let around = neighbours.iter().map(|&(idx, _)| self.lrd[idx]).sum::<f64>()
            / neighbours.len() as f64;
        around / own
    }
}

/// Local outlier factor: ratio of neighbour density to own density.
#[derive(Debug, Clone)]
pub struct Lof {
    n_neighbors: usize,
    contamination: Contamination,
    fitted: Option<Fitted<Neighbourhood>>,
}

impl Lof {
    /// Creates an unfitted LOF detector.
    #[must_use]
    pub fn new(n_neighbors: usize, contamination: Contamination) -> Self {
        Self {
            n_neighbors: n_neighbors.max(1),
            contamination,
            fitted: None,
        }
    }
}

impl Detector for Lof {
    fn family(&self) -> &'static str {
        FAMILY
    }

    fn fit(&mut self, data: &Dataset) -> EngineResult<()> {
        require_rows(data, 3, FAMILY)?;
        let reference = data.view().to_owned();
        let k = self.n_neighbors.min(data.n_rows() - 1);
        let neighbourhoods: Vec<Vec<(usize, f64)>> = reference
            .outer_iter()
            .map(|row| nearest(reference.view(), row, k, true))
            .collect();
        let k_distance = neighbourhoods
            .iter()
            .map(|found| found.last().map_or(0.0, |&(_, dist)| dist))
            .collect();
        let mut model = Neighbourhood {
            reference,
            k,
            k_distance,
            lrd: Vec::new(),
        };
        model.lrd = neighbourhoods
            .iter()
            .map(|found| model.local_density(found))
            .collect();
        let training_scores: Vec<f64> = model
            .reference
            .outer_iter()
            .map(|row| model.factor(row))
            .collect();
        let threshold = self.contamination.threshold(&training_scores);
        self.fitted = Some(Fitted {
            state: model,
            threshold,
        });
        Ok(())
    }

    fn decision_function(&self, data: &Dataset) -> EngineResult<Vec<f64>> {
        let fitted = require_fitted(&self.fitted, FAMILY)?;
        require_width(data, fitted.state.reference.ncols(), FAMILY)?;
        Ok(data.view().outer_iter().map(|row| fitted.state.factor(row)).collect())
    }

    fn threshold(&self) -> EngineResult<f64> {
        Ok(require_fitted(&self.fitted, FAMILY)?.threshold)
    }

    fn describe(&self) -> String {
        format!(
            "LOF(contamination={}, n_neighbors={}, metric='euclidean')",
            self.contamination.value(),
            self.n_neighbors
        )
    }
}
