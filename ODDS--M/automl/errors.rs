use std::path::PathBuf;

use thiserror::Error;

/// Result alias used across the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// Failures raised by search, evaluation and batch processing.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid budget, empty candidate space or an unusable setting.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Every trial of a search failed to fit or score.
    #[error("search exhausted: all {failed} trials failed")]
    SearchExhausted {
        /// Number of failed trial attempts.
        failed: usize,
    },
    /// Two sequences that must align do not.
    #[error("data shape mismatch in {context}: expected {expected}, got {actual}")]
    DataShape {
        /// What was being compared.
        context: String,
        /// Required length.
        expected: usize,
        /// Observed length.
        actual: usize,
    },
    /// A metric cannot be computed for the given inputs.
    #[error("{metric} is undefined: {reason}")]
    UndefinedMetric {
        /// Metric name.
        metric: &'static str,
        /// Why it is undefined.
        reason: String,
    },
    /// A detector could not be trained.
    #[error("{family} failed to fit: {reason}")]
    ModelFit {
        /// Candidate family id.
        family: String,
        /// Underlying cause.
        reason: String,
    },
    /// `predict` or `decision_function` called before `fit`.
    #[error("{family} used before fit")]
    NotFitted {
        /// Candidate family id.
        family: String,
    },
    /// A dataset file could not be parsed.
    #[error("cannot load {}: {reason}", .path.display())]
    DataLoad {
        /// Offending file.
        path: PathBuf,
        /// Parse failure detail.
        reason: String,
    },
    /// Filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub(crate) fn fit(family: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ModelFit {
            family: family.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn shape(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        Self::DataShape {
            context: context.into(),
            expected,
            actual,
        }
    }

    pub(crate) fn undefined(metric: &'static str, reason: impl Into<String>) -> Self {
        Self::UndefinedMetric {
            metric,
            reason: reason.into(),
        }
    }

    /// True when the error concerns a single dataset and the batch may continue.
    #[must_use]
    pub const fn is_dataset_scoped(&self) -> bool {
        matches!(
            self,
            Self::SearchExhausted { .. }
                | Self::DataShape { .. }
                | Self::UndefinedMetric { .. }
                | Self::ModelFit { .. }
                | Self::DataLoad { .. }
        )
    }

    /// Stable short name of the failure class, used in reports and events.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "configuration",
            Self::SearchExhausted { .. } => "search_exhausted",
            Self::DataShape { .. } => "data_shape",
            Self::UndefinedMetric { .. } => "undefined_metric",
            Self::ModelFit { .. } => "model_fit",
            Self::NotFitted { .. } => "not_fitted",
            Self::DataLoad { .. } => "data_load",
            Self::Io(_) => "io",
        }
    }
}
