#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rust_2018_idioms,
    missing_docs
)]
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::module_name_repetitions
)]

//! Automated outlier-detector selection: budgeted CASH search over nine detector
//! families, retraining of the winner, and goodness-of-fit evaluation across batches
//! of labelled datasets.

/// Engine error taxonomy.
#[path = "../errors.rs"]
pub mod errors;

/// Numeric feature tables, labels and validation splits.
#[path = "../dataset.rs"]
pub mod dataset;

/// Detector contract and the built-in families.
#[path = "../detectors/main.rs"]
pub mod detectors;

/// Hyperparameter domains and the candidate space.
#[path = "../space/main.rs"]
pub mod space;

/// The search controller.
#[path = "../cash/main.rs"]
pub mod cash;

/// Metrics, reports and the results table.
#[path = "../evaluation/main.rs"]
pub mod evaluation;

/// Multi-dataset orchestration.
#[path = "../batch/main.rs"]
pub mod batch;

/// TOML engine configuration.
#[path = "../config.rs"]
pub mod config;

/// Structured logs and progress events.
#[path = "../telemetry.rs"]
pub mod telemetry;

pub use batch::{
    BatchOutcome, BatchRunner, BatchSettings, CsvDirectorySource, DatasetFailure, DatasetReport,
    DatasetSource, FailurePolicy, MemorySource, PredictionObserver,
};
pub use cash::{Cash, CashSettings, Objective, SamplerKind, SearchOutcome, TrialOutcome, TrialResult};
pub use config::EngineConfig;
pub use dataset::{Dataset, GroundTruth, Validation};
pub use detectors::{Contamination, Detector};
pub use errors::{EngineError, EngineResult};
pub use evaluation::{Evaluation, Evaluator, MetricsReport, ResultsRow, ResultsTable};
pub use space::{CandidateConfiguration, CandidateFamily, CandidateSpace, HyperParams, ParameterValue};
pub use telemetry::{EngineEvent, EngineTelemetry, EngineTelemetryBuilder};
