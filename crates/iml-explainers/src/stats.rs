//! Summary statistics shared by the aggregation steps.
use itertools_num::linspace;
use linfa_linalg::svd::SVDInto;
use ndarray::{s, Array1, Array2};
use statrs::statistics::{Data, Median, OrderStatistics, Statistics};

/// Sample quantile (`tau` in 0..=1) of `values`. Returns NaN for empty input.
pub fn quantile(values: &[f64], tau: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut data = Data::new(values.to_vec());
    data.quantile(tau)
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    Data::new(values.to_vec()).median()
}

pub fn mean(values: &[f64]) -> f64 {
    values.iter().mean()
}

/// Unbiased sample variance; 0 for fewer than two values.
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values.iter().variance()
}

/// Smallest and largest finite value, `None` when there is none.
pub fn min_max(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// `n` evenly spaced points from the minimum to the maximum of `values`.
/// A constant column yields a single point.
pub fn equidistant_grid(values: &[f64], n: usize) -> Vec<f64> {
    match min_max(values) {
        None => Vec::new(),
        Some((lo, hi)) if lo == hi => vec![lo],
        Some((lo, hi)) => linspace(lo, hi, n).collect(),
    }
}

/// `n` quantiles of `values` at evenly spaced probabilities, deduplicated.
pub fn quantile_grid(values: &[f64], n: usize) -> Vec<f64> {
    if values.is_empty() || n == 0 {
        return Vec::new();
    }
    let mut data = Data::new(values.iter().copied().filter(|v| v.is_finite()).collect::<Vec<_>>());
    let mut grid: Vec<f64> = linspace(0.0, 1.0, n).map(|tau| data.quantile(tau)).collect();
    grid.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    grid.dedup();
    grid
}

/// Weighted coefficient of determination of `fitted` against `actual`.
pub fn weighted_r_squared(actual: &[f64], fitted: &[f64], weights: &[f64]) -> f64 {
    let w_sum: f64 = weights.iter().sum();
    if w_sum <= 0.0 {
        return f64::NAN;
    }
    let w_mean = actual.iter().zip(weights).map(|(a, w)| a * w).sum::<f64>() / w_sum;
    let ss_tot: f64 = actual.iter().zip(weights).map(|(a, w)| w * (a - w_mean).powi(2)).sum();
    let ss_res: f64 = actual
        .iter()
        .zip(fitted)
        .zip(weights)
        .map(|((a, f), w)| w * (a - f).powi(2))
        .sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

/// Singular values below this fraction of the largest count as zero.
const RCOND: f64 = 1e-10;

/// Weighted least squares with an intercept. Returns the intercept and one
/// coefficient per column of `x`, or `None` when the design is rank
/// deficient.
///
/// Rows are scaled by `sqrt(w)` and the ordinary least squares problem is
/// solved through the SVD. Negative weights count as zero.
pub fn weighted_least_squares(x: &Array2<f64>, y: &[f64], w: &[f64]) -> Option<(f64, Vec<f64>)> {
    let (n, p) = x.dim();
    let mut a = Array2::<f64>::zeros((n, p + 1));
    let mut b = Array1::<f64>::zeros(n);
    for i in 0..n {
        let sw = w[i].max(0.0).sqrt();
        a[[i, 0]] = sw;
        for j in 0..p {
            a[[i, j + 1]] = sw * x[[i, j]];
        }
        b[i] = sw * y[i];
    }
    let coef = least_squares_svd(a, &b)?;
    Some((coef[0], coef.slice(s![1..]).to_vec()))
}

/// Least squares solution of `a · c = b` via the singular value decomposition.
fn least_squares_svd(a: Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let (n, d) = a.dim();
    if n < d {
        return None;
    }
    let (u, sigma, vt) = a.svd_into(true, true).ok()?;
    let (u, vt) = (u?, vt?);
    let largest = sigma.iter().fold(0.0_f64, |m, v| m.max(*v));
    if sigma.len() < d || largest <= 0.0 || sigma.iter().any(|&s| s <= RCOND * largest) {
        return None;
    }
    let mut coef = Array1::<f64>::zeros(d);
    for (i, &s) in sigma.iter().enumerate() {
        let scale = u.column(i).dot(b) / s;
        coef.scaled_add(scale, &vt.row(i));
    }
    Some(coef)
}
