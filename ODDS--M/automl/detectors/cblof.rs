use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::{rngs::SmallRng, Rng, SeedableRng};

use super::{
    func::sq_distance, require_fitted, require_rows, require_width, Contamination, Detector, Fitted,
};
use crate::{dataset::Dataset, errors::EngineResult};

const FAMILY: &str = "cblof";
const MAX_ITERATIONS: usize = 100;

#[derive(Debug, Clone, PartialEq)]
struct Clusters {
    centroids: Array2<f64>,
    sizes: Vec<usize>,
    large: Vec<bool>,
}

impl Clusters {
    fn closest(&self, point: ArrayView1<'_, f64>, only_large: bool) -> (usize, f64) {
        self.centroids
            .outer_iter()
            .enumerate()
            .filter(|(idx, _)| !only_large || self.large[*idx])
            .map(|(idx, centroid)| (idx, sq_distance(centroid, point).sqrt()))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((0, 0.0))
    }

    fn score(&self, point: ArrayView1<'_, f64>, use_weights: bool) -> f64 {
        let (cluster, distance) = self.closest(point, false);
        let distance = if self.large[cluster] {
            distance
        } else {
            self.closest(point, true).1
        };
        if use_weights {
            distance * self.sizes[cluster] as f64
        } else {
            distance
        }
    }
}

/// Cluster-based local outlier factor: distance to the nearest large k-means cluster.
#[derive(Debug, Clone)]
pub struct Cblof {
    n_clusters: usize,
    alpha: f64,
    beta: f64,
    use_weights: bool,
    contamination: Contamination,
    seed: u64,
    fitted: Option<Fitted<Clusters>>,
}

impl Cblof {
    /// Creates an unfitted detector.
    ///
    /// `alpha` is the share of rows the large clusters must cover; `beta` the size ratio
    /// between consecutive clusters that also marks the boundary.
    #[must_use]
    pub fn new(
        n_clusters: usize,
        alpha: f64,
        beta: f64,
        use_weights: bool,
        contamination: Contamination,
        seed: u64,
    ) -> Self {
        Self {
            n_clusters: n_clusters.max(2),
            alpha,
            beta,
            use_weights,
            contamination,
            seed,
            fitted: None,
        }
    }
}

/// k-means++ seeding followed by Lloyd iterations. Returns centroids and assignments.
fn kmeans(data: ArrayView2<'_, f64>, k: usize, rng: &mut SmallRng) -> (Array2<f64>, Vec<usize>) {
    let n = data.nrows();
    let mut centroids = Array2::<f64>::zeros((k, data.ncols()));
    centroids.row_mut(0).assign(&data.row(rng.gen_range(0..n)));
    let mut closest: Vec<f64> = data
        .outer_iter()
        .map(|row| sq_distance(row, centroids.row(0)))
        .collect();
    for c in 1..k {
        let total: f64 = closest.iter().sum();
        let pick = if total > 0.0 {
            let mut target = rng.gen::<f64>() * total;
            closest
                .iter()
                .position(|&d| {
                    target -= d;
                    target <= 0.0
                })
                .unwrap_or(n - 1)
        } else {
            rng.gen_range(0..n)
        };
        centroids.row_mut(c).assign(&data.row(pick));
        for (slot, row) in closest.iter_mut().zip(data.outer_iter()) {
            *slot = slot.min(sq_distance(row, centroids.row(c)));
        }
    }

    let mut assignment = vec![usize::MAX; n];
    for _ in 0..MAX_ITERATIONS {
        let mut changed = false;
        for (slot, row) in assignment.iter_mut().zip(data.outer_iter()) {
            let best = centroids
                .outer_iter()
                .enumerate()
                .map(|(idx, centroid)| (idx, sq_distance(centroid, row)))
                .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
                .map_or(0, |(idx, _)| idx);
            if *slot != best {
                *slot = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }
        let mut sums = Array2::<f64>::zeros(centroids.raw_dim());
        let mut counts = vec![0_usize; k];
        for (&cluster, row) in assignment.iter().zip(data.outer_iter()) {
            let mut sum = sums.row_mut(cluster);
            sum += &row;
            counts[cluster] += 1;
        }
        // Empty clusters keep their previous centroid.
        for (cluster, &count) in counts.iter().enumerate() {
            if count > 0 {
                let mean = &sums.row(cluster) / count as f64;
                centroids.row_mut(cluster).assign(&mean);
            }
        }
    }
    (centroids, assignment)
}

/// Marks the biggest clusters as large until they cover `alpha` of the rows or the next
/// cluster is `beta` times smaller.
fn split_large(sizes: &[usize], alpha: f64, beta: f64) -> Vec<bool> {
    let total: usize = sizes.iter().sum();
    let mut order: Vec<usize> = (0..sizes.len()).collect();
    order.sort_by(|&a, &b| sizes[b].cmp(&sizes[a]).then(a.cmp(&b)));
    let mut large = vec![true; sizes.len()];
    let mut covered = 0;
    for (pos, pair) in order.windows(2).enumerate() {
        let (this, next) = (sizes[pair[0]], sizes[pair[1]]);
        covered += this;
        let coverage_reached = covered as f64 >= alpha * total as f64;
        let sharp_drop = next == 0 || this as f64 / next as f64 >= beta;
        if coverage_reached || sharp_drop {
            for &small in &order[pos + 1..] {
                large[small] = false;
            }
            break;
        }
    }
    large
}

impl Detector for Cblof {
    fn family(&self) -> &'static str {
        FAMILY
    }

    fn fit(&mut self, data: &Dataset) -> EngineResult<()> {
        require_rows(data, 2, FAMILY)?;
        let mut rng = SmallRng::seed_from_u64(self.seed);
        let view = data.view();
        let k = self.n_clusters.min(data.n_rows());
        let (centroids, assignment) = kmeans(view, k, &mut rng);
        let mut sizes = vec![0; k];
        for &cluster in &assignment {
            sizes[cluster] += 1;
        }
        let clusters = Clusters {
            centroids,
            large: split_large(&sizes, self.alpha, self.beta),
            sizes,
        };
        let scores: Vec<f64> = view
            .outer_iter()
            .map(|row| clusters.score(row, self.use_weights))
            .collect();
        let threshold = self.contamination.threshold(&scores);
        self.fitted = Some(Fitted {
            state: clusters,
            threshold,
        });
        Ok(())
    }

    fn decision_function(&self, data: &Dataset) -> EngineResult<Vec<f64>> {
        let fitted = require_fitted(&self.fitted, FAMILY)?;
        require_width(data, fitted.state.centroids.ncols(), FAMILY)?;
        Ok(data
            .view()
            .outer_iter()
            .map(|row| fitted.state.score(row, self.use_weights))
            .collect())
    }

    fn threshold(&self) -> EngineResult<f64> {
        Ok(require_fitted(&self.fitted, FAMILY)?.threshold)
    }

    fn describe(&self) -> String {
        format!(
            "CBLOF(alpha={:.4}, beta={:.4}, contamination={}, n_clusters={}, random_state={}, use_weights={})",
            self.alpha,
            self.beta,
            self.contamination.value(),
            self.n_clusters,
            self.seed,
            if self.use_weights { "True" } else { "False" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::fixtures::{clustered_with_outliers, top_scored, OUTLIERS};

    #[test]
    fn outliers_fall_in_small_clusters() {
        let data = clustered_with_outliers();
        for seed in [1, 7, 42] {
            let mut cblof = Cblof::new(4, 0.9, 5.0, false, Contamination::DEFAULT, seed);
            cblof.fit(&data).unwrap();
            let clusters = &cblof.fitted.as_ref().unwrap().state;
            assert!(clusters.large.iter().any(|large| *large));
            let scores = cblof.decision_function(&data).unwrap();
            assert_eq!(top_scored(&scores, 3), OUTLIERS.to_vec(), "seed {seed}");
            assert_eq!(cblof.predict(&data).unwrap()[60..], [1, 1, 1]);
        }
    }

    #[test]
    fn large_clusters_stop_at_coverage_or_size_drop() {
        assert_eq!(split_large(&[60, 1, 1, 1], 0.9, 5.0), [true, false, false, false]);
        assert_eq!(split_large(&[30, 2, 30, 1], 0.9, 20.0), [true, false, true, false]);
        assert_eq!(split_large(&[10, 10, 10], 0.99, 5.0), [true, true, true]);
        assert_eq!(split_large(&[10, 0], 0.99, 50.0), [true, false]);
    }

    #[test]
    fn weights_scale_by_cluster_size() {
        let data = Dataset::from_rows(&[vec![0.0], vec![2.0], vec![10.0]]).unwrap();
        let mut plain = Cblof::new(2, 0.5, 5.0, false, Contamination::DEFAULT, 3);
        plain.fit(&data).unwrap();
        assert_eq!(plain.decision_function(&data).unwrap(), vec![1.0, 1.0, 9.0]);
        let mut weighted = Cblof::new(2, 0.5, 5.0, true, Contamination::DEFAULT, 3);
        weighted.fit(&data).unwrap();
        assert_eq!(weighted.decision_function(&data).unwrap(), vec![2.0, 2.0, 9.0]);
        assert!(weighted.describe().contains("use_weights=True"));
    }
}
