//! Sequential search-then-evaluate over every dataset of a source.

/// Dataset sources: CSV directories and in-memory tables.
pub mod loader;

use std::{
    fmt, fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    cash::{Cash, TrialResult},
    dataset::Dataset,
    errors::{EngineError, EngineResult},
    evaluation::{Evaluator, MetricsReport, ResultsTable},
    telemetry::{EngineEvent, EngineTelemetry},
};

pub use loader::{read_csv, split_record, CsvDirectorySource, DatasetSource, MemorySource, LABEL_COLUMN};

const RETRAIN_SEPARATOR: &str =
    "\n\n>>> >>> >>> >>> >>> >>> >>> === >>> >>> >>> >>> >>> >>> >>>\n\nFINAL RESULT AFTER RETRAINING\n";

/// What the batch does when one dataset fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and continue with the next dataset.
    #[default]
    Isolate,
    /// Stop the batch at the first failure.
    Abort,
}

impl FromStr for FailurePolicy {
    type Err = EngineError;

    fn from_str(raw: &str) -> EngineResult<Self> {
        match raw {
            "isolate" => Ok(Self::Isolate),
            "abort" => Ok(Self::Abort),
            other => Err(EngineError::Configuration(format!(
                "unknown failure policy `{other}`"
            ))),
        }
    }
}

/// Receives each evaluated dataset's outputs, e.g. to plot them.
pub trait PredictionObserver {
    /// Called once per successfully evaluated dataset.
    fn observe(&mut self, dataset_id: &str, data: &Dataset, predictions: &[u8], scores: &[f64]);
}

/// Where and how a batch writes its artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    /// Directory for `results_<id>.txt` reports.
    pub report_dir: PathBuf,
    /// Summary CSV written once at the end, if set.
    pub table_path: Option<PathBuf>,
    /// Evaluate against labels when the source has them.
    pub ground_truth: bool,
    /// Failure handling.
    pub failure_policy: FailurePolicy,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            report_dir: PathBuf::from("results"),
            table_path: Some(PathBuf::from("results/summary.csv")),
            ground_truth: true,
            failure_policy: FailurePolicy::Isolate,
        }
    }
}

/// A dataset that was abandoned, and why.
#[derive(Debug)]
pub struct DatasetFailure {
    /// Dataset identifier.
    pub dataset: String,
    /// The error that stopped it.
    pub error: EngineError,
}

impl fmt::Display for DatasetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.dataset, self.error, self.error.kind())
    }
}

/// Artifacts of one processed dataset.
#[derive(Debug, Clone)]
pub struct DatasetReport {
    /// Dataset identifier.
    pub dataset: String,
    /// Written report file.
    pub path: PathBuf,
    /// Winning trial.
    pub best: TrialResult,
    /// Metrics, absent when evaluation was skipped for lack of labels.
    pub metrics: Option<MetricsReport>,
}

/// Everything a batch produced.
#[derive(Debug)]
pub struct BatchOutcome {
    /// `run-<uuid>`.
    pub run_id: String,
    /// Wall-clock start of the run.
    pub started_at: DateTime<Utc>,
    /// Summary rows, one per evaluated dataset.
    pub table: ResultsTable,
    /// Per-dataset artifacts in processing order.
    pub reports: Vec<DatasetReport>,
    /// Datasets that failed under the isolate policy.
    pub failures: Vec<DatasetFailure>,
}

/// Runs search then evaluation for each dataset, one at a time.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    cash: Cash,
    evaluator: Evaluator,
    settings: BatchSettings,
    telemetry: Option<EngineTelemetry>,
}

impl BatchRunner {
    /// Creates a runner.
    #[must_use]
    pub fn new(cash: Cash, settings: BatchSettings) -> Self {
        Self {
            cash,
            evaluator: Evaluator,
            settings,
            telemetry: None,
        }
    }

    /// Attaches telemetry to the runner and its search controller.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: EngineTelemetry) -> Self {
        self.cash = self.cash.with_telemetry(telemetry.clone());
        self.telemetry = Some(telemetry);
        self
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &BatchSettings {
        &self.settings
    }

    fn record(&self, event: &EngineEvent) {
        if let Some(tel) = &self.telemetry {
            tel.record(event);
        }
    }

    /// Processes every dataset of `source`.
    pub fn run(&self, source: &dyn DatasetSource) -> EngineResult<BatchOutcome> {
        self.run_inner(source, None)
    }

    /// Like [`Self::run`], handing each evaluation's outputs to `observer`.
    pub fn run_with_observer(
        &self,
        source: &dyn DatasetSource,
        observer: &mut dyn PredictionObserver,
    ) -> EngineResult<BatchOutcome> {
        self.run_inner(source, Some(observer))
    }

    fn run_inner(
        &self,
        source: &dyn DatasetSource,
        mut observer: Option<&mut dyn PredictionObserver>,
    ) -> EngineResult<BatchOutcome> {
        let run_id = format!("run-{}", Uuid::new_v4());
        let started_at = Utc::now();
        fs::create_dir_all(&self.settings.report_dir)?;
        let mut table = ResultsTable::new();
        let mut reports = Vec::new();
        let mut failures = Vec::new();
        for id in source.list()? {
            self.record(&EngineEvent::DatasetStarted { dataset: id.clone() });
            match self.process(source, &id, &mut table, &mut observer) {
                Ok(report) => {
                    if let Some(metrics) = &report.metrics {
                        self.record(&EngineEvent::DatasetEvaluated {
                            dataset: id.clone(),
                            f1: metrics.f1,
                            roc_auc: metrics.roc_auc,
                            model: metrics.model.clone(),
                        });
                    }
                    reports.push(report);
                }
                Err(error) => {
                    self.record(&EngineEvent::DatasetFailed {
                        dataset: id.clone(),
                        error_kind: error.kind().to_string(),
                        reason: error.to_string(),
                    });
                    if self.settings.failure_policy == FailurePolicy::Abort
                        || !error.is_dataset_scoped()
                    {
                        return Err(error);
                    }
                    failures.push(DatasetFailure { dataset: id, error });
                }
            }
        }
        if let Some(path) = &self.settings.table_path {
            table.write_csv(path)?;
        }
        self.record(&EngineEvent::BatchCompleted {
            run_id: run_id.clone(),
            evaluated: table.len(),
            failed: failures.len(),
        });
        Ok(BatchOutcome {
            run_id,
            started_at,
            table,
            reports,
            failures,
        })
    }

    fn process(
        &self,
        source: &dyn DatasetSource,
        id: &str,
        table: &mut ResultsTable,
        observer: &mut Option<&mut dyn PredictionObserver>,
    ) -> EngineResult<DatasetReport> {
        let (data, labels) = source.load(id)?;
        let labels = labels.filter(|_| self.settings.ground_truth);
        let outcome = self.cash.search(&data, labels.as_ref())?;
        let mut text = outcome.log.clone();
        text.push_str(RETRAIN_SEPARATOR);
        let metrics = match &labels {
            Some(truth) => {
                let evaluation = self.evaluator.evaluate(
                    &*outcome.model,
                    &data,
                    truth,
                    id,
                    outcome.retrain_elapsed,
                    table,
                )?;
                if let Some(observer) = observer {
                    observer.observe(id, &data, &evaluation.predictions, &evaluation.scores);
                }
                text.push_str(&evaluation.report.diagnostics);
                Some(evaluation.report)
            }
            None => {
                text.push_str(&format!("model: {}\n", outcome.model.describe()));
                text.push_str("evaluation skipped: no ground truth available\n");
                None
            }
        };
        let path = report_path(&self.settings.report_dir, id);
        fs::write(&path, text)?;
        Ok(DatasetReport {
            dataset: id.to_string(),
            path,
            best: outcome.best,
            metrics,
        })
    }
}

/// `<dir>/results_<id>.txt`.
#[must_use]
pub fn report_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("results_{id}.txt"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cash::CashSettings,
        dataset::{GroundTruth, Validation},
        space::CandidateSpace,
    };
    use tempfile::tempdir;

    fn dataset(rows: usize, anomalies: &[usize]) -> (Dataset, GroundTruth) {
        let data: Vec<Vec<f64>> = (0..rows)
            .map(|i| {
                let t = i as f64;
                if anomalies.contains(&i) {
                    vec![6.0 + t * 0.01, -6.0]
                } else {
                    vec![(t * 0.5).sin(), (t * 0.3).cos()]
                }
            })
            .collect();
        let labels = (0..rows).map(|i| u8::from(anomalies.contains(&i))).collect();
        (
            Dataset::from_rows(&data).unwrap(),
            GroundTruth::new(labels).unwrap(),
        )
    }

    fn runner(dir: &Path, policy: FailurePolicy) -> BatchRunner {
        let cash = Cash::new(
            CandidateSpace::default_space().unwrap(),
            CashSettings {
                max_evals: 4,
                ..CashSettings::default()
            },
        );
        BatchRunner::new(
            cash,
            BatchSettings {
                report_dir: dir.join("reports"),
                table_path: Some(dir.join("summary.csv")),
                ground_truth: true,
                failure_policy: policy,
            },
        )
    }

    #[derive(Default)]
    struct Seen(Vec<String>);

    impl PredictionObserver for Seen {
        fn observe(&mut self, dataset_id: &str, data: &Dataset, predictions: &[u8], scores: &[f64]) {
            assert_eq!(predictions.len(), data.n_rows());
            assert_eq!(scores.len(), data.n_rows());
            self.0.push(dataset_id.to_string());
        }
    }

    #[test]
    fn abort_policy_stops_at_first_failure() {
        let dir = tempdir().unwrap();
        let (good, labels) = dataset(40, &[3, 20]);
        let source = MemorySource::new()
            .with("first", good.clone(), Some(GroundTruth::new(vec![0; 39]).unwrap()))
            .with("second", good, Some(labels));
        let err = runner(dir.path(), FailurePolicy::Abort).run(&source).unwrap_err();
        assert!(matches!(err, EngineError::DataShape { .. }));
        assert!(!dir.path().join("summary.csv").exists());
    }

    #[test]
    fn unlabelled_datasets_get_a_report_but_no_row() {
        let dir = tempdir().unwrap();
        let (data, labels) = dataset(40, &[3, 20]);
        let source = MemorySource::new()
            .with("plain", data.clone(), None)
            .with("labelled", data, Some(labels));
        let mut seen = Seen::default();
        let outcome = runner(dir.path(), FailurePolicy::Isolate)
            .run_with_observer(&source, &mut seen)
            .unwrap();
        assert_eq!(outcome.reports.len(), 2);
        assert_eq!(outcome.table.len(), 1);
        assert_eq!(seen.0, ["labelled"]);
        let plain = fs::read_to_string(report_path(&dir.path().join("reports"), "plain")).unwrap();
        assert!(plain.contains("FINAL RESULT AFTER RETRAINING"));
        assert!(plain.contains("evaluation skipped"));
    }

    #[test]
    fn ground_truth_can_be_disabled() {
        let dir = tempdir().unwrap();
        let (data, labels) = dataset(40, &[3, 20]);
        let source = MemorySource::new().with("d", data, Some(labels));
        let mut runner = runner(dir.path(), FailurePolicy::Isolate);
        runner.settings.ground_truth = false;
        let outcome = runner.run(&source).unwrap();
        assert!(outcome.table.is_empty());
        assert!(outcome.reports[0].metrics.is_none());
    }

    #[test]
    fn dataset_too_small_for_holdout_is_isolated() {
        let dir = tempdir().unwrap();
        let (first, first_labels) = dataset(60, &[3, 50]);
        let (tiny, tiny_labels) = dataset(2, &[1]);
        let (third, third_labels) = dataset(60, &[10, 55]);
        let source = MemorySource::new()
            .with("first", first, Some(first_labels))
            .with("tiny", tiny, Some(tiny_labels))
            .with("third", third, Some(third_labels));
        let cash = Cash::new(
            CandidateSpace::default_space().unwrap(),
            CashSettings {
                max_evals: 4,
                validation: Validation::Holdout { ratio: 0.25 },
                ..CashSettings::default()
            },
        );
        let runner = BatchRunner::new(
            cash,
            BatchSettings {
                report_dir: dir.path().join("reports"),
                table_path: None,
                ground_truth: true,
                failure_policy: FailurePolicy::Isolate,
            },
        );
        let outcome = runner.run(&source).unwrap();
        assert_eq!(outcome.table.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].dataset, "tiny");
        assert!(matches!(outcome.failures[0].error, EngineError::DataShape { .. }));
    }

    #[test]
    fn failure_policy_parses() {
        assert_eq!("abort".parse::<FailurePolicy>().unwrap(), FailurePolicy::Abort);
        assert!("retry".parse::<FailurePolicy>().is_err());
    }
}
