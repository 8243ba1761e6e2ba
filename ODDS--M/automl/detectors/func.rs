use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Squared euclidean distance.
#[must_use]
pub fn sq_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Distances from `query` to its `k` nearest rows of `reference`, ascending.
///
/// With `leave_one_out`, the first exact match is treated as the query itself and skipped.
#[must_use]
pub fn nearest(
    reference: ArrayView2<'_, f64>,
    query: ArrayView1<'_, f64>,
    k: usize,
    leave_one_out: bool,
) -> Vec<(usize, f64)> {
    let mut distances: Vec<(usize, f64)> = reference
        .outer_iter()
        .enumerate()
        .map(|(idx, row)| (idx, sq_distance(row, query).sqrt()))
        .collect();
    distances.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    if leave_one_out {
        if let Some(pos) = distances.iter().position(|(_, d)| *d == 0.0) {
            distances.remove(pos);
        }
    }
    distances.truncate(k);
    distances
}

/// Column means and standard deviations; zero deviations are replaced by 1.
#[must_use]
pub fn column_moments(data: ArrayView2<'_, f64>) -> (Array1<f64>, Array1<f64>) {
    let rows = data.nrows().max(1) as f64;
    let mean = data.sum_axis(Axis(0)) / rows;
    let mut std = Array1::<f64>::zeros(data.ncols());
    for row in data.outer_iter() {
        std += &(&row - &mean).mapv(|v| v * v);
    }
    let std = (std / rows).mapv(|v| {
        let s = v.sqrt();
        if s > 1e-12 {
            s
        } else {
            1.0
        }
    });
    (mean, std)
}

/// Standardizes rows with the given moments.
#[must_use]
pub fn standardize(data: ArrayView2<'_, f64>, mean: &Array1<f64>, std: &Array1<f64>) -> Array2<f64> {
    let mut out = data.to_owned();
    for mut row in out.outer_iter_mut() {
        row -= mean;
        row /= std;
    }
    out
}

/// Sample covariance (divided by n) around `mean`.
#[must_use]
pub fn covariance(data: ArrayView2<'_, f64>, mean: &Array1<f64>) -> Array2<f64> {
    let centered = standardize(data, mean, &Array1::ones(mean.len()));
    centered.t().dot(&centered) / data.nrows().max(1) as f64
}

/// Gauss-Jordan inverse with partial pivoting. `None` when singular.
#[must_use]
pub fn invert(matrix: &Array2<f64>) -> Option<Array2<f64>> {
    let n = matrix.nrows();
    let scale = matrix.iter().fold(0.0_f64, |acc, v| acc.max(v.abs())).max(1.0);
    let mut work = matrix.clone();
    let mut inverse = Array2::<f64>::eye(n);
    for col in 0..n {
        let pivot = (col..n).max_by(|&a, &b| work[[a, col]].abs().total_cmp(&work[[b, col]].abs()))?;
        if work[[pivot, col]].abs() <= 1e-12 * scale {
            return None;
        }
        if pivot != col {
            for j in 0..n {
                work.swap([pivot, j], [col, j]);
                inverse.swap([pivot, j], [col, j]);
            }
        }
        let diag = work[[col, col]];
        for j in 0..n {
            work[[col, j]] /= diag;
            inverse[[col, j]] /= diag;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = work[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                work[[row, j]] -= factor * work[[col, j]];
                inverse[[row, j]] -= factor * inverse[[col, j]];
            }
        }
    }
    Some(inverse)
}

/// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations.
///
/// Returns eigenvalues in descending order with matching eigenvectors as columns.
#[must_use]
pub fn symmetric_eigen(matrix: &Array2<f64>) -> (Array1<f64>, Array2<f64>) {
    let n = matrix.nrows();
    let mut a = matrix.clone();
    let mut vectors = Array2::<f64>::eye(n);
    for _sweep in 0..100 {
        let off: f64 = (0..n)
            .flat_map(|i| (0..n).filter(move |&j| j != i).map(move |j| (i, j)))
            .map(|(i, j)| a[[i, j]].powi(2))
            .sum();
        if off < 1e-20 {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                if a[[p, q]].abs() < 1e-300 {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * a[[p, q]]);
                let t = theta.signum() / (theta.abs() + theta.mul_add(theta, 1.0).sqrt());
                let t = if theta == 0.0 { 1.0 } else { t };
                let c = 1.0 / t.mul_add(t, 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = vectors[[k, p]];
                    let vkq = vectors[[k, q]];
                    vectors[[k, p]] = c * vkp - s * vkq;
                    vectors[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&x, &y| a[[y, y]].total_cmp(&a[[x, x]]));
    let values = order.iter().map(|&i| a[[i, i]]).collect::<Array1<f64>>();
    let vectors = vectors.select(Axis(1), &order);
    (values, vectors)
}

/// Linear-interpolated quantile (`q` in [0, 1]) of unsorted values.
#[must_use]
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    let frac = pos - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn nearest_skips_self_once() {
        let data = array![[0.0], [0.0], [3.0]];
        let found = nearest(data.view(), data.row(0), 2, true);
        assert_eq!(found, vec![(1, 0.0), (2, 3.0)]);
        let with_self = nearest(data.view(), data.row(2), 1, false);
        assert_eq!(with_self, vec![(2, 0.0)]);
    }

    #[test]
    fn inverse_round_trips_identity() {
        let m = array![[4.0, 1.0], [2.0, 3.0]];
        let inv = invert(&m).unwrap();
        let product = m.dot(&inv);
        for ((i, j), v) in product.indexed_iter() {
            let expected = if i == j { 1.0 } else { 0.0 };
            assert!((v - expected).abs() < 1e-9);
        }
        assert!(invert(&array![[1.0, 2.0], [2.0, 4.0]]).is_none());
    }

    #[test]
    fn eigen_of_diagonal_is_sorted() {
        let (values, vectors) = symmetric_eigen(&array![[1.0, 0.0], [0.0, 5.0]]);
        assert!((values[0] - 5.0).abs() < 1e-12);
        assert!((vectors[[1, 0]].abs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn eigen_recovers_correlated_axis() {
        let (values, _) = symmetric_eigen(&array![[2.0, 1.0], [1.0, 2.0]]);
        assert!((values[0] - 3.0).abs() < 1e-9);
        assert!((values[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn quantile_interpolates() {
        assert!((quantile(&[4.0, 1.0, 3.0, 2.0], 0.5) - 2.5).abs() < 1e-12);
        assert_eq!(quantile(&[7.0], 0.95), 7.0);
    }

    #[test]
    fn moments_guard_constant_columns() {
        let (mean, std) = column_moments(array![[1.0, 2.0], [1.0, 4.0]].view());
        assert_eq!(mean[0], 1.0);
        assert_eq!(std[0], 1.0);
        assert!((std[1] - 1.0).abs() < 1e-12);
    }
}
