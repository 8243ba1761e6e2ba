//! Goodness-of-fit evaluation of a retrained model against ground truth.
//!
//! Predictions and scores come from the same rows the model was fitted on, so the
//! reported numbers describe training fit, not generalization.

/// Confusion counts, rate metrics and ROC-AUC.
pub mod metrics;
/// The per-dataset metrics report.
pub mod reporter;
/// Cross-dataset results table.
pub mod table;

use std::time::{Duration, Instant};

use crate::{
    dataset::{Dataset, GroundTruth},
    detectors::Detector,
    errors::{EngineError, EngineResult},
};

use metrics::{polarity_corrected, roc_auc, ConfusionMatrix};
pub use reporter::MetricsReport;
pub use table::{ResultsRow, ResultsTable};

/// Everything an evaluation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Metrics and diagnostics.
    pub report: MetricsReport,
    /// Binary labels from `predict`.
    pub predictions: Vec<u8>,
    /// Outlier scores from `decision_function`.
    pub scores: Vec<f64>,
}

/// Turns a fitted model's outputs into a metrics report and a summary row.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator;

impl Evaluator {
    /// Scores `data` with `model`, checks the labels, computes the metrics and appends a
    /// row to `table`. Elapsed time is `fit_elapsed` plus the predict time measured here.
    ///
    /// Nothing is appended when any check fails.
    pub fn evaluate(
        &self,
        model: &dyn Detector,
        data: &Dataset,
        labels: &GroundTruth,
        dataset_id: &str,
        fit_elapsed: Duration,
        table: &mut ResultsTable,
    ) -> EngineResult<Evaluation> {
        labels.check_against(data)?;
        if labels.is_single_class() {
            return Err(EngineError::undefined(
                "roc_auc",
                format!(
                    "ground truth of `{dataset_id}` has a single class ({} anomalies in {} rows)",
                    labels.anomalies(),
                    labels.len()
                ),
            ));
        }
        let started = Instant::now();
        let predictions = model.predict(data)?;
        let scores = model.decision_function(data)?;
        let elapsed = fit_elapsed + started.elapsed();
        if predictions.len() != data.n_rows() {
            return Err(EngineError::shape("predictions vs dataset rows", data.n_rows(), predictions.len()));
        }
        if scores.len() != data.n_rows() {
            return Err(EngineError::shape("scores vs dataset rows", data.n_rows(), scores.len()));
        }

        let confusion = ConfusionMatrix::from_labels(labels.as_slice(), &predictions)?;
        let raw_roc_auc = roc_auc(labels.as_slice(), &scores)?;
        let mut report = MetricsReport {
            dataset: dataset_id.to_string(),
            model: model.describe(),
            rows: data.n_rows(),
            anomalies: labels.anomalies(),
            flagged: predictions.iter().filter(|&&p| p == 1).count(),
            confusion,
            accuracy: confusion.accuracy(),
            precision: confusion.precision(),
            recall: confusion.recall(),
            f1: confusion.f1(),
            raw_roc_auc,
            roc_auc: polarity_corrected(raw_roc_auc),
            elapsed_secs: elapsed.as_secs_f64(),
            diagnostics: String::new(),
        };
        report.diagnostics = reporter::render_diagnostics(&report);
        table.push(ResultsRow {
            dataset: report.dataset.clone(),
            precision: report.precision,
            recall: report.recall,
            f1: report.f1,
            roc_auc: report.roc_auc,
            elapsed_secs: report.elapsed_secs,
            model: report.model.clone(),
        });
        Ok(Evaluation {
            report,
            predictions,
            scores,
        })
    }
}
