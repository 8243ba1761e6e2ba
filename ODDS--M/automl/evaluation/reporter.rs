use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

use super::metrics::ConfusionMatrix;

/// Goodness-of-fit metrics of one retrained model on its own training data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsReport {
    /// Dataset identifier.
    pub dataset: String,
    /// Model descriptor.
    pub model: String,
    /// Rows scored.
    pub rows: usize,
    /// Rows labelled anomalous.
    pub anomalies: usize,
    /// Rows the model flagged.
    pub flagged: usize,
    /// Confusion counts.
    pub confusion: ConfusionMatrix,
    /// Fraction labelled correctly.
    pub accuracy: f64,
    /// Precision of the anomaly class.
    pub precision: f64,
    /// Recall of the anomaly class.
    pub recall: f64,
    /// F1 of the anomaly class.
    pub f1: f64,
    /// ROC-AUC before polarity correction.
    pub raw_roc_auc: f64,
    /// `max(raw, 1 - raw)`.
    pub roc_auc: f64,
    /// Retrain fit plus predict time, in seconds.
    pub elapsed_secs: f64,
    /// Rendered performance block.
    pub diagnostics: String,
}

/// Renders the performance printout stored in the report.
pub(crate) fn render_diagnostics(report: &MetricsReport) -> String {
    let c = &report.confusion;
    let mut out = String::new();
    let _ = writeln!(out, "model: {}", report.model);
    let _ = writeln!(
        out,
        "rows: {} | anomalies: {} | flagged: {}",
        report.rows, report.anomalies, report.flagged
    );
    let _ = writeln!(out, "confusion matrix (rows = truth, cols = predicted):");
    let _ = writeln!(out, "            normal  anomaly");
    let _ = writeln!(out, "  normal  {:>8} {:>8}", c.true_negative, c.false_positive);
    let _ = writeln!(out, "  anomaly {:>8} {:>8}", c.false_negative, c.true_positive);
    let _ = writeln!(out, "accuracy:  {:.6}", report.accuracy);
    let _ = writeln!(out, "precision: {:.6}", report.precision);
    let _ = writeln!(out, "recall:    {:.6}", report.recall);
    let _ = writeln!(out, "f1:        {:.6}", report.f1);
    let _ = writeln!(
        out,
        "roc_auc:   {:.6} (raw {:.6})",
        report.roc_auc, report.raw_roc_auc
    );
    let _ = writeln!(out, "processing time: {:.6} seconds", report.elapsed_secs);
    let _ = writeln!(
        out,
        "note: metrics measure fit on the training rows, not generalization"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_include_counts_and_metrics() {
        let mut report = MetricsReport {
            dataset: "d".into(),
            model: "KNN(contamination=0.05, method='mean', n_neighbors=5)".into(),
            rows: 10,
            anomalies: 2,
            flagged: 1,
            confusion: ConfusionMatrix {
                true_positive: 1,
                false_positive: 0,
                true_negative: 8,
                false_negative: 1,
            },
            accuracy: 0.9,
            precision: 1.0,
            recall: 0.5,
            f1: 2.0 / 3.0,
            raw_roc_auc: 0.25,
            roc_auc: 0.75,
            elapsed_secs: 0.5,
            diagnostics: String::new(),
        };
        report.diagnostics = render_diagnostics(&report);
        assert!(report.diagnostics.starts_with("model: KNN("));
        assert!(report.diagnostics.contains("f1:        0.666667"));
        assert!(report.diagnostics.contains("roc_auc:   0.750000 (raw 0.250000)"));
        assert!(report.diagnostics.contains("  anomaly        1        1"));
    }
}
