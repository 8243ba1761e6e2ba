use ndarray::{ArrayView1, ArrayView2};
use rand::{rngs::SmallRng, seq::index, Rng, SeedableRng};

use super::{require_fitted, require_rows, require_width, Contamination, Detector, Fitted};
use crate::{dataset::Dataset, errors::EngineResult};

const FAMILY: &str = "iforest";
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        value: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Forest {
    trees: Vec<Node>,
    sample_size: usize,
    features: usize,
}

/// Isolation forest: anomalies are isolated by fewer random splits.
#[derive(Debug, Clone)]
pub struct IsolationForest {
    n_estimators: usize,
    max_samples: usize,
    contamination: Contamination,
    seed: u64,
    fitted: Option<Fitted<Forest>>,
}

impl IsolationForest {
    /// Creates an unfitted forest.
    #[must_use]
    pub fn new(n_estimators: usize, max_samples: usize, contamination: Contamination, seed: u64) -> Self {
        Self {
            n_estimators: n_estimators.max(1),
            max_samples: max_samples.max(2),
            contamination,
            seed,
            fitted: None,
        }
    }
}

/// Average path length of an unsuccessful BST search over `n` points.
fn average_path(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Point at fraction `t` of `[lo, hi]`, finite even when `hi - lo` overflows.
fn split_point(lo: f64, hi: f64, t: f64) -> f64 {
    let width = hi - lo;
    if width.is_finite() {
        lo + t * width
    } else {
        lo * (1.0 - t) + hi * t
    }
}

fn build(
    data: ArrayView2<'_, f64>,
    rows: &[usize],
    depth: usize,
    limit: usize,
    rng: &mut SmallRng,
) -> Node {
    if depth >= limit || rows.len() <= 1 {
        return Node::Leaf { size: rows.len() };
    }
    let splittable: Vec<(usize, f64, f64)> = (0..data.ncols())
        .filter_map(|feature| {
            let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                let v = data[[r, feature]];
                (lo.min(v), hi.max(v))
            });
            (hi > lo).then_some((feature, lo, hi))
        })
        .collect();
    if splittable.is_empty() {
        return Node::Leaf { size: rows.len() };
    }
    let (feature, lo, hi) = splittable[rng.gen_range(0..splittable.len())];
    let value = split_point(lo, hi, rng.gen());
    let (left, right): (Vec<usize>, Vec<usize>) =
        rows.iter().partition(|&&r| data[[r, feature]] < value);
    Node::Split {
        feature,
        value,
        left: Box::new(build(data, &left, depth + 1, limit, rng)),
        right: Box::new(build(data, &right, depth + 1, limit, rng)),
    }
}

fn path_length(node: &Node, point: ArrayView1<'_, f64>, depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path(*size),
        Node::Split {
            feature,
            value,
            left,
            right,
        } => {
            let next = if point[*feature] < *value { left } else { right };
            path_length(next, point, depth + 1)
        }
    }
}

impl Forest {
    fn score(&self, point: ArrayView1<'_, f64>) -> f64 {
        let mean_path = self
            .trees
            .iter()
            .map(|tree| path_length(tree, point, 0))
            .sum::<f64>()
            / self.trees.len() as f64;
        2f64.powf(-mean_path / average_path(self.sample_size))
    }

    fn score_all(&self, data: ArrayView2<'_, f64>) -> Vec<f64> {
        data.outer_iter().map(|row| self.score(row)).collect()
    }
}

impl Detector for IsolationForest {
    fn family(&self) -> &'static str {
        FAMILY
    }

    fn fit(&mut self, data: &Dataset) -> EngineResult<()> {
        require_rows(data, 2, FAMILY)?;
        let mut rng = SmallRng::seed_from_u64(self.seed);
        let sample_size = self.max_samples.min(data.n_rows());
        let limit = (sample_size as f64).log2().ceil() as usize;
        let view = data.view();
        let trees = (0..self.n_estimators)
            .map(|_| {
                let rows = index::sample(&mut rng, data.n_rows(), sample_size).into_vec();
                build(view, &rows, 0, limit, &mut rng)
            })
            .collect();
        let forest = Forest {
            trees,
            sample_size,
            features: data.n_features(),
        };
        let threshold = self.contamination.threshold(&forest.score_all(view));
        self.fitted = Some(Fitted {
            state: forest,
            threshold,
        });
        Ok(())
    }

    fn decision_function(&self, data: &Dataset) -> EngineResult<Vec<f64>> {
        let fitted = require_fitted(&self.fitted, FAMILY)?;
        require_width(data, fitted.state.features, FAMILY)?;
        Ok(fitted.state.score_all(data.view()))
    }

    fn threshold(&self) -> EngineResult<f64> {
        Ok(require_fitted(&self.fitted, FAMILY)?.threshold)
    }

    fn describe(&self) -> String {
        format!(
            "IsolationForest(contamination={}, max_samples={}, n_estimators={}, random_state={})",
            self.contamination.value(),
            self.max_samples,
            self.n_estimators,
            self.seed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::fixtures::{clustered_with_outliers, top_scored, OUTLIERS};
    use crate::errors::EngineError;

    #[test]
    fn isolates_far_points_first() {
        let data = clustered_with_outliers();
        let mut forest = IsolationForest::new(100, 64, Contamination::DEFAULT, 7);
        forest.fit(&data).unwrap();
        let scores = forest.decision_function(&data).unwrap();
        assert_eq!(top_scored(&scores, 3), OUTLIERS.to_vec());
        let labels = forest.predict(&data).unwrap();
        assert!(OUTLIERS.iter().all(|&idx| labels[idx] == 1));
    }

    #[test]
    fn same_seed_same_scores() {
        let data = clustered_with_outliers();
        let mut a = IsolationForest::new(20, 32, Contamination::DEFAULT, 11);
        let mut b = IsolationForest::new(20, 32, Contamination::DEFAULT, 11);
        a.fit(&data).unwrap();
        b.fit(&data).unwrap();
        assert_eq!(a.decision_function(&data).unwrap(), b.decision_function(&data).unwrap());
    }

    #[test]
    fn predict_before_fit_is_reported() {
        let forest = IsolationForest::new(10, 16, Contamination::DEFAULT, 1);
        let err = forest.predict(&clustered_with_outliers()).unwrap_err();
        assert!(matches!(err, EngineError::NotFitted { .. }));
    }

    #[test]
    fn splits_stay_finite_when_the_feature_range_overflows() {
        assert_eq!(split_point(-1.5e308, 1.5e308, 0.5), 0.0);
        assert!(split_point(-1.5e308, 1.5e308, 0.99).is_finite());
        assert_eq!(split_point(1.0, 3.0, 0.25), 1.5);

        let rows: Vec<Vec<f64>> = (0..20)
            .map(|i| vec![if i % 2 == 0 { 1.5e308 } else { -1.5e308 }, f64::from(i)])
            .collect();
        let data = Dataset::from_rows(&rows).unwrap();
        let mut forest = IsolationForest::new(10, 16, Contamination::DEFAULT, 3);
        forest.fit(&data).unwrap();
        let scores = forest.decision_function(&data).unwrap();
        assert!(scores.iter().all(|s| s.is_finite()));
    }

    #[test]
    fn path_normaliser_matches_reference_values() {
        assert_eq!(average_path(1), 0.0);
        assert_eq!(average_path(2), 1.0);
        assert!((average_path(256) - 10.244_770_920_116_851).abs() < 1e-6);
    }
}
