use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use shared_event_bus::{EventPublisher, EventRecord};
use shared_logging::{JsonLogger, LogLevel, LogRecord};
use tokio::runtime::{Handle, Runtime};

/// Progress milestones of a search or batch run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A search began.
    SearchStarted {
        /// Trial budget.
        max_evals: usize,
        /// Sampler name.
        sampler: String,
        /// Objective name, or `separation` without labels.
        objective: String,
        /// Validation scheme.
        validation: String,
        /// Master seed.
        seed: u64,
    },
    /// A trial produced a model (scored or not).
    TrialCompleted {
        /// Zero-based trial index.
        trial: usize,
        /// Rendered configuration.
        configuration: String,
        /// Quality value, if any.
        quality: Option<f64>,
        /// Wall-clock seconds.
        elapsed_secs: f64,
    },
    /// A trial raised an error and was recorded as failed.
    TrialFailed {
        /// Zero-based trial index.
        trial: usize,
        /// Rendered configuration.
        configuration: String,
        /// Failure message.
        reason: String,
    },
    /// The winning configuration was retrained.
    SearchCompleted {
        /// Winning trial index.
        best_trial: usize,
        /// Winning configuration.
        configuration: String,
        /// Winning quality, if any.
        quality: Option<f64>,
        /// Failed attempts.
        failed: usize,
    },
    /// The batch picked up a dataset.
    DatasetStarted {
        /// Dataset identifier.
        dataset: String,
    },
    /// A dataset was searched and evaluated.
    DatasetEvaluated {
        /// Dataset identifier.
        dataset: String,
        /// F1 of the retrained model.
        f1: f64,
        /// Polarity-corrected ROC-AUC.
        roc_auc: f64,
        /// Model descriptor.
        model: String,
    },
    /// A dataset was abandoned.
    DatasetFailed {
        /// Dataset identifier.
        dataset: String,
        /// Failure class.
        error_kind: String,
        /// Failure message.
        reason: String,
    },
    /// The batch finished.
    BatchCompleted {
        /// Run identifier.
        run_id: String,
        /// Datasets that produced a table row.
        evaluated: usize,
        /// Datasets that failed.
        failed: usize,
    },
}

impl EngineEvent {
    /// Snake-case name, also used as log message and event suffix.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SearchStarted { .. } => "search_started",
            Self::TrialCompleted { .. } => "trial_completed",
            Self::TrialFailed { .. } => "trial_failed",
            Self::SearchCompleted { .. } => "search_completed",
            Self::DatasetStarted { .. } => "dataset_started",
            Self::DatasetEvaluated { .. } => "dataset_evaluated",
            Self::DatasetFailed { .. } => "dataset_failed",
            Self::BatchCompleted { .. } => "batch_completed",
        }
    }

    /// Severity used when the event is logged.
    #[must_use]
    pub const fn level(&self) -> LogLevel {
        match self {
            Self::TrialCompleted { .. } => LogLevel::Debug,
            Self::TrialFailed { .. } | Self::DatasetFailed { .. } => LogLevel::Warn,
            _ => LogLevel::Info,
        }
    }
}

/// Builder for engine telemetry sinks.
pub struct EngineTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    min_level: LogLevel,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl EngineTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            min_level: LogLevel::Debug,
            event_publisher: None,
        }
    }

    /// Sets the log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Drops log records below `level`.
    #[must_use]
    pub const fn min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<EngineTelemetry> {
        let logger = match self.log_path {
            Some(path) => Some(JsonLogger::new(path)?.with_min_level(self.min_level)),
            None => None,
        };
        let event = match self.event_publisher {
            Some(publisher) => Some(EventHandle::new(publisher)?),
            None => None,
        };
        Ok(EngineTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                logger,
                event,
            }),
        })
    }
}

/// Telemetry handle shared by the search controller and the batch runner.
#[derive(Clone)]
pub struct EngineTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for EngineTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineTelemetry")
            .field("module", &self.inner.module)
            .field("logs", &self.inner.logger.is_some())
            .field("events", &self.inner.event.is_some())
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    logger: Option<JsonLogger>,
    event: Option<EventHandle>,
}

struct EventHandle {
    runtime: Runtime,
    publisher: Arc<dyn EventPublisher>,
}

impl EventHandle {
    fn new(publisher: Arc<dyn EventPublisher>) -> Result<Self> {
        Ok(Self {
            runtime: tokio::runtime::Builder::new_current_thread().enable_all().build()?,
            publisher,
        })
    }

    fn publish(&self, record: EventRecord) -> Result<()> {
        if let Ok(handle) = Handle::try_current() {
            let publisher = Arc::clone(&self.publisher);
            handle.spawn(async move {
                if let Err(err) = publisher.publish(record).await {
                    eprintln!("telemetry event publish failed: {err:?}");
                }
            });
            Ok(())
        } else {
            self.runtime.block_on(self.publisher.publish(record))
        }
    }
}

impl EngineTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> EngineTelemetryBuilder {
        EngineTelemetryBuilder::new(module)
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) -> Result<()> {
        if let Some(logger) = &self.inner.logger {
            let record = LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            logger.log(&record)?;
        }
        Ok(())
    }

    /// Emits an event on the bus.
    pub fn event(&self, event_type: &str, payload: Value) -> Result<()> {
        if let Some(handle) = &self.inner.event {
            handle.publish(EventRecord::new(&self.inner.module, event_type, payload))?;
        }
        Ok(())
    }

    /// Logs `event` and publishes it as `automl.<kind>`. Both sinks are attempted; the
    /// first failure is returned.
    pub fn try_record(&self, event: &EngineEvent) -> Result<()> {
        let payload = serde_json::to_value(event)?;
        let logged = self.log(event.level(), event.kind(), payload.clone());
        let published = self.event(&format!("automl.{}", event.kind()), payload);
        logged.and(published)
    }

    /// Like [`Self::try_record`], reporting sink failures on stderr instead of failing.
    pub fn record(&self, event: &EngineEvent) {
        if let Err(err) = self.try_record(event) {
            eprintln!("telemetry record `{}` failed: {err:?}", event.kind());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_event_bus::{FileEventPublisher, MemoryEventBus};
    use tempfile::tempdir;

    #[test]
    fn telemetry_writes_log_and_event() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("automl.log");
        let bus = Arc::new(MemoryEventBus::new(16));
        let telemetry = EngineTelemetry::builder("automl")
            .log_path(&path)
            .event_publisher(bus.clone())
            .build()
            .unwrap();
        telemetry
            .log(LogLevel::Info, "search_started", json!({ "max_evals": 3 }))
            .unwrap();
        telemetry.record(&EngineEvent::DatasetStarted {
            dataset: "cardio".into(),
        });
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("search_started"));
        assert!(content.contains("dataset_started"));
        let events = bus.snapshot_under("automl.");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "automl.dataset_started");
        assert_eq!(events[0].payload["dataset"], "cardio");
    }

    #[test]
    fn broken_event_sink_does_not_block_the_log() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("automl.log");
        let events_dir = tmp.path().join("events");
        std::fs::create_dir_all(&events_dir).unwrap();
        let telemetry = EngineTelemetry::builder("automl")
            .log_path(&path)
            .event_publisher(Arc::new(FileEventPublisher::new(&events_dir).unwrap()))
            .build()
            .unwrap();
        let event = EngineEvent::DatasetStarted {
            dataset: "shuttle".into(),
        };
        assert!(telemetry.try_record(&event).is_err());
        telemetry.record(&event);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            content.lines().filter(|line| line.contains("shuttle")).count(),
            2
        );
    }

    #[test]
    fn min_level_filters_debug_records() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("automl.log");
        let telemetry = EngineTelemetry::builder("automl")
            .log_path(&path)
            .min_level(LogLevel::Info)
            .build()
            .unwrap();
        telemetry.record(&EngineEvent::TrialCompleted {
            trial: 0,
            configuration: "knn(n_neighbors=3)".into(),
            quality: Some(0.5),
            elapsed_secs: 0.01,
        });
        telemetry.record(&EngineEvent::TrialFailed {
            trial: 1,
            configuration: "lof(n_neighbors=5)".into(),
            reason: "boom".into(),
        });
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("trial_completed"));
        assert!(content.contains("trial_failed"));
    }
}
