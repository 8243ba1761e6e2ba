use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::{rngs::SmallRng, seq::index, SeedableRng};

use super::{
    func::{column_moments, sq_distance, standardize},
    require_fitted, require_rows, require_width, Contamination, Detector, Fitted,
};
use crate::{dataset::Dataset, errors::EngineResult};

const FAMILY: &str = "ocsvm";
const TOLERANCE: f64 = 1e-3;
const BOUND_EPS: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
struct Machine {
    mean: Array1<f64>,
    std: Array1<f64>,
    support: Array2<f64>,
    coef: Vec<f64>,
    rho: f64,
    gamma: f64,
}

impl Machine {
    /// Negated decision value: positive outside the learned support.
    fn score(&self, point: ArrayView1<'_, f64>) -> f64 {
        let z = (&point - &self.mean) / &self.std;
        let inside: f64 = self
            .support
            .outer_iter()
            .zip(&self.coef)
            .map(|(sv, coef)| coef * (-self.gamma * sq_distance(sv, z.view())).exp())
            .sum();
        self.rho - inside
    }
}

fn rbf_kernel(rows: &Array2<f64>, gamma: f64) -> Array2<f64> {
    let m = rows.nrows();
    let mut kernel = Array2::<f64>::ones((m, m));
    for i in 0..m {
        for j in 0..i {
            let value = (-gamma * sq_distance(rows.row(i), rows.row(j))).exp();
            kernel[[i, j]] = value;
            kernel[[j, i]] = value;
        }
    }
    kernel
}

/// Solves the one-class dual `min ½αᵀKα` s.t. `0 ≤ α ≤ 1/(νm)`, `Σα = 1` by pairwise
/// coordinate descent on the most violating pair. Returns the multipliers and the offset.
fn solve(kernel: &Array2<f64>, nu: f64) -> (Vec<f64>, f64) {
    let m = kernel.nrows();
    let cap = 1.0 / (nu * m as f64);
    let whole = ((nu * m as f64).floor() as usize).min(m);
    let mut alpha = vec![0.0; m];
    for slot in alpha.iter_mut().take(whole) {
        *slot = cap;
    }
    if whole < m {
        alpha[whole] = (whole as f64).mul_add(-cap, 1.0).max(0.0);
    }
    let mut grad: Vec<f64> = (0..m)
        .map(|t| (0..m).map(|s| kernel[[t, s]] * alpha[s]).sum())
        .collect();

    for _ in 0..m.saturating_mul(100) {
        let up = (0..m)
            .filter(|&t| alpha[t] < cap - BOUND_EPS)
            .min_by(|&a, &b| grad[a].total_cmp(&grad[b]));
        let down = (0..m)
            .filter(|&t| alpha[t] > BOUND_EPS)
            .max_by(|&a, &b| grad[a].total_cmp(&grad[b]));
        let (Some(i), Some(j)) = (up, down) else {
            break;
        };
        if grad[j] - grad[i] < TOLERANCE {
            break;
        }
        let curvature = (kernel[[i, i]] + kernel[[j, j]] - 2.0 * kernel[[i, j]]).max(BOUND_EPS);
        let delta = ((grad[j] - grad[i]) / curvature)
            .min(cap - alpha[i])
            .min(alpha[j]);
        alpha[i] += delta;
        alpha[j] -= delta;
        for (t, g) in grad.iter_mut().enumerate() {
            *g += delta * (kernel[[t, i]] - kernel[[t, j]]);
        }
    }
    let rho = offset(&alpha, &grad, cap);
    (alpha, rho)
}

/// Mean gradient over free multipliers, else the midpoint of the bounded ones.
fn offset(alpha: &[f64], grad: &[f64], cap: f64) -> f64 {
    let free: Vec<f64> = alpha
        .iter()
        .zip(grad)
        .filter(|(a, _)| **a > BOUND_EPS && **a < cap - BOUND_EPS)
        .map(|(_, g)| *g)
        .collect();
    if !free.is_empty() {
        return free.iter().sum::<f64>() / free.len() as f64;
    }
    let at_cap = alpha
        .iter()
        .zip(grad)
        .filter(|(a, _)| **a >= cap - BOUND_EPS)
        .map(|(_, g)| *g)
        .reduce(f64::max);
    let at_zero = alpha
        .iter()
        .zip(grad)
        .filter(|(a, _)| **a <= BOUND_EPS)
        .map(|(_, g)| *g)
        .reduce(f64::min);
    match (at_cap, at_zero) {
        (Some(lo), Some(hi)) => (lo + hi) / 2.0,
        (Some(g), None) | (None, Some(g)) => g,
        (None, None) => 0.0,
    }
}

/// One-class SVM with an RBF kernel, trained on a random subsample of standardized rows.
#[derive(Debug, Clone)]
pub struct OneClassSvm {
    nu: f64,
    gamma: f64,
    max_samples: usize,
    contamination: Contamination,
    seed: u64,
    fitted: Option<Fitted<Machine>>,
}

impl OneClassSvm {
    /// Creates an unfitted machine. `nu` is clamped into (0, 1].
    #[must_use]
    pub fn new(nu: f64, gamma: f64, max_samples: usize, contamination: Contamination, seed: u64) -> Self {
        Self {
            nu: nu.clamp(1e-3, 1.0),
            gamma,
            max_samples: max_samples.max(2),
            contamination,
            seed,
            fitted: None,
        }
    }
}

impl Detector for OneClassSvm {
    fn family(&self) -> &'static str {
        FAMILY
    }

    fn fit(&mut self, data: &Dataset) -> EngineResult<()> {
        require_rows(data, 2, FAMILY)?;
        let view = data.view();
        let (mean, std) = column_moments(view);
        let scaled = standardize(view, &mean, &std);
        let mut rng = SmallRng::seed_from_u64(self.seed);
        let picked = index::sample(&mut rng, data.n_rows(), self.max_samples.min(data.n_rows())).into_vec();
        let sample = scaled.select(Axis(0), &picked);
        let (alpha, rho) = solve(&rbf_kernel(&sample, self.gamma), self.nu);
        let keep: Vec<usize> = (0..alpha.len()).filter(|&i| alpha[i] > BOUND_EPS).collect();
        let machine = Machine {
            mean,
            std,
            support: sample.select(Axis(0), &keep),
            coef: keep.iter().map(|&i| alpha[i]).collect(),
            rho,
            gamma: self.gamma,
        };
        let scores: Vec<f64> = view.outer_iter().map(|row| machine.score(row)).collect();
        let threshold = self.contamination.threshold(&scores);
        self.fitted = Some(Fitted {
            state: machine,
            threshold,
        });
        Ok(())
    }

    fn decision_function(&self, data: &Dataset) -> EngineResult<Vec<f64>> {
        let fitted = require_fitted(&self.fitted, FAMILY)?;
        require_width(data, fitted.state.mean.len(), FAMILY)?;
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
            "OCSVM(contamination={}, gamma={:.4}, kernel='rbf', max_samples={}, nu={:.4}, random_state={})",
            self.contamination.value(),
            self.gamma,
            self.max_samples,
            self.nu,
            self.seed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::fixtures::{clustered_with_outliers, top_scored, OUTLIERS};
    use ndarray::array;

    #[test]
    fn outliers_sit_outside_the_support() {
        let data = clustered_with_outliers();
        let mut svm = OneClassSvm::new(0.1, 0.5, 256, Contamination::DEFAULT, 11);
        svm.fit(&data).unwrap();
        let scores = svm.decision_function(&data).unwrap();
        assert_eq!(top_scored(&scores, 3), OUTLIERS.to_vec());
        assert!(OUTLIERS.iter().all(|&idx| scores[idx] > 0.0));
        assert_eq!(svm.predict(&data).unwrap()[60..], [1, 1, 1]);
    }

    #[test]
    fn orthogonal_points_share_the_mass_evenly() {
        let (alpha, rho) = solve(&Array2::eye(4), 0.5);
        for a in &alpha {
            assert!((a - 0.25).abs() < 1e-9, "{alpha:?}");
        }
        assert!((rho - 0.25).abs() < 1e-9);
    }

    #[test]
    fn multipliers_stay_feasible() {
        let rows = array![[0.0, 0.0], [0.1, 0.0], [0.0, 0.1], [3.0, 3.0], [0.05, 0.05]];
        let nu = 0.4;
        let (alpha, _) = solve(&rbf_kernel(&rows, 1.0), nu);
        let cap = 1.0 / (nu * 5.0);
        assert!((alpha.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(alpha.iter().all(|a| *a >= 0.0 && *a <= cap + 1e-12));
        assert!(alpha[3] > 0.0);
    }

    #[test]
    fn subsample_caps_the_support() {
        let data = clustered_with_outliers();
        let mut svm = OneClassSvm::new(0.5, 0.5, 16, Contamination::DEFAULT, 3);
        svm.fit(&data).unwrap();
        assert!(svm.fitted.as_ref().unwrap().state.support.nrows() <= 16);
        assert!(svm.describe().starts_with("OCSVM(contamination=0.05, gamma=0.5000"));
    }
}
