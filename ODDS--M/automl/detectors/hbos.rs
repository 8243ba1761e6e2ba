use ndarray::ArrayView1;

use super::{require_fitted, require_rows, require_width, Contamination, Detector, Fitted};
use crate::{dataset::Dataset, errors::EngineResult};

const FAMILY: &str = "hbos";

/// Static-width histogram of one feature; densities are bin frequencies.
#[derive(Debug, Clone, PartialEq)]
struct Histogram {
    low: f64,
    width: f64,
    density: Vec<f64>,
}

impl Histogram {
    fn build(values: ArrayView1<'_, f64>, bins: usize) -> Self {
        let low = values.iter().copied().fold(f64::INFINITY, f64::min);
        let high = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let bins = if high > low { bins } else { 1 };
        let width = if high > low {
            (high - low) / bins as f64
        } else {
            0.0
        };
        let mut counts = vec![0usize; bins];
        let mut histogram = Self {
            low,
            width,
            density: Vec::new(),
        };
        for &value in values {
            if let Some(bin) = histogram.bin(value, bins) {
                counts[bin] += 1;
            }
        }
        let total = values.len().max(1) as f64;
        histogram.density = counts.into_iter().map(|c| c as f64 / total).collect();
        histogram
    }

    fn bin(&self, value: f64, bins: usize) -> Option<usize> {
        if self.width == 0.0 {
            return ((value - self.low).abs() <= f64::EPSILON * self.low.abs().max(1.0)).then_some(0);
        }
        let offset = (value - self.low) / self.width;
        let last = bins as f64;
        if offset < 0.0 || offset > last + 1e-9 {
            return None;
        }
        Some((offset.floor() as usize).min(bins - 1))
    }

    fn density_at(&self, value: f64) -> f64 {
        self.bin(value, self.density.len())
            .map_or(0.0, |bin| self.density[bin])
    }
}

/// Histogram-based outlier score: sum over features of `-ln(density + alpha)`.
#[derive(Debug, Clone)]
pub struct Hbos {
    n_bins: usize,
    alpha: f64,
    contamination: Contamination,
    fitted: Option<Fitted<Vec<Histogram>>>,
}

impl Hbos {
    /// Creates an unfitted detector.
    #[must_use]
    pub fn new(n_bins: usize, alpha: f64, contamination: Contamination) -> Self {
        Self {
            n_bins: n_bins.max(1),
            alpha: alpha.max(f64::MIN_POSITIVE),
            contamination,
            fitted: None,
        }
    }

    fn score(&self, histograms: &[Histogram], row: ArrayView1<'_, f64>) -> f64 {
        histograms
            .iter()
            .zip(row.iter())
            .map(|(hist, &value)| -(hist.density_at(value) + self.alpha).ln())
            .sum()
    }
}

impl Detector for Hbos {
    fn family(&self) -> &'static str {
        FAMILY
    }

    fn fit(&mut self, data: &Dataset) -> EngineResult<()> {
        require_rows(data, 2, FAMILY)?;
        let view = data.view();
        let histograms: Vec<Histogram> = view
            .columns()
            .into_iter()
            .map(|column| Histogram::build(column, self.n_bins))
            .collect();
        let scores: Vec<f64> = view
            .outer_iter()
            .map(|row| self.score(&histograms, row))
            .collect();
        let threshold = self.contamination.threshold(&scores);
        self.fitted = Some(Fitted {
            state: histograms,
            threshold,
        });
        Ok(())
    }

    fn decision_function(&self, data: &Dataset) -> EngineResult<Vec<f64>> {
        let fitted = require_fitted(&self.fitted, FAMILY)?;
        require_width(data, fitted.state.len(), FAMILY)?;
        Ok(data
            .view()
            .outer_iter()
            .map(|row| self.score(&fitted.state, row))
            .collect())
    }

    fn threshold(&self) -> EngineResult<f64> {
        Ok(require_fitted(&self.fitted, FAMILY)?.threshold)
    }

    fn describe(&self) -> String {
        format!(
            "HBOS(alpha={:.4}, contamination={}, n_bins={})",
            self.alpha,
            self.contamination.value(),
            self.n_bins
        )
    }
}
