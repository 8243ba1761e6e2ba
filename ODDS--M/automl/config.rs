use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared_logging::LogLevel;

use crate::{
    batch::{BatchSettings, FailurePolicy},
    cash::{CashSettings, Objective, SamplerKind},
    dataset::Validation,
    errors::{EngineError, EngineResult},
    space::CandidateSpace,
};

/// Engine configuration document (`odds.toml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Search knobs.
    #[serde(default)]
    pub search: SearchSection,
    /// Batch inputs and outputs.
    #[serde(default)]
    pub batch: BatchSection,
    /// Log and event sinks.
    #[serde(default)]
    pub telemetry: TelemetrySection,
}

/// `[search]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSection {
    /// Trial budget per dataset.
    #[serde(default = "default_max_evals")]
    pub max_evals: usize,
    /// Master seed.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// `tpe` or `random`.
    #[serde(default)]
    pub sampler: SamplerKind,
    /// `f1` or `roc_auc`.
    #[serde(default)]
    pub objective: Objective,
    /// Fraction of trailing rows held out for trial scoring; absent means full data.
    #[serde(default)]
    pub holdout_ratio: Option<f64>,
    /// Per-trial wall-clock cap.
    #[serde(default)]
    pub max_trial_seconds: Option<f64>,
    /// Allow-list of families to search; absent means all built-ins.
    #[serde(default)]
    pub families: Option<Vec<String>>,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            max_evals: default_max_evals(),
            seed: default_seed(),
            sampler: SamplerKind::default(),
            objective: Objective::default(),
            holdout_ratio: None,
            max_trial_seconds: None,
            families: None,
        }
    }
}

/// `[batch]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSection {
    /// Directory of labelled CSV files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Directory for per-dataset reports.
    #[serde(default = "default_report_dir")]
    pub report_dir: PathBuf,
    /// Summary CSV path.
    #[serde(default = "default_table_path")]
    pub table_path: Option<PathBuf>,
    /// Evaluate against the `label` column.
    #[serde(default = "default_true")]
    pub ground_truth: bool,
    /// `isolate` or `abort`.
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for BatchSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            report_dir: default_report_dir(),
            table_path: default_table_path(),
            ground_truth: true,
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// `[telemetry]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySection {
    /// JSON-lines log file.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    /// JSON-lines event file.
    #[serde(default)]
    pub event_log: Option<PathBuf>,
    /// Minimum level written to the log.
    #[serde(default = "default_min_level")]
    pub min_level: LogLevel,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            log_path: None,
            event_log: None,
            min_level: default_min_level(),
        }
    }
}

impl EngineConfig {
    /// Loads and validates a TOML file. Relative paths resolve against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading engine config {}", path.display()))?;
        let mut config = Self::from_toml(&raw).with_context(|| format!("parsing {}", path.display()))?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_paths(&base);
        Ok(config)
    }

    /// Parses and validates TOML text without touching paths.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values no search could run with.
    pub fn validate(&self) -> EngineResult<()> {
        let invalid = |reason: String| -> EngineResult<()> { Err(EngineError::Configuration(reason)) };
        if self.search.max_evals == 0 {
            return invalid("search.max_evals must be at least 1".into());
        }
        if let Some(ratio) = self.search.holdout_ratio {
            if !(ratio > 0.0 && ratio <= 0.9) {
                return invalid(format!("search.holdout_ratio {ratio} outside (0, 0.9]"));
            }
        }
        if let Some(secs) = self.search.max_trial_seconds {
            if !(secs.is_finite() && secs > 0.0) {
                return invalid(format!("search.max_trial_seconds must be positive, got {secs}"));
            }
        }
        if let Some(families) = &self.search.families {
            if families.is_empty() {
                return invalid("search.families is set but empty".into());
            }
            CandidateSpace::default_space()?.restricted(families)?;
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.batch.data_dir);
        resolve(&mut self.batch.report_dir);
        [
            &mut self.batch.table_path,
            &mut self.telemetry.log_path,
            &mut self.telemetry.event_log,
        ]
        .into_iter()
        .flatten()
        .for_each(resolve);
    }

    /// Search settings for the controller.
    #[must_use]
    pub fn cash_settings(&self) -> CashSettings {
        CashSettings {
            max_evals: self.search.max_evals,
            seed: self.search.seed,
            validation: self
                .search
                .holdout_ratio
                .map_or(Validation::FullData, |ratio| Validation::Holdout { ratio }),
            objective: self.search.objective,
            sampler: self.search.sampler,
            max_trial_duration: self.search.max_trial_seconds.map(Duration::from_secs_f64),
        }
    }

    /// Built-in families, narrowed to `search.families` when set.
    pub fn candidate_space(&self) -> EngineResult<CandidateSpace> {
        let space = CandidateSpace::default_space()?;
        match &self.search.families {
            Some(families) => space.restricted(families),
            None => Ok(space),
        }
    }

    /// Batch runner settings.
    #[must_use]
    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            report_dir: self.batch.report_dir.clone(),
            table_path: self.batch.table_path.clone(),
            ground_truth: self.batch.ground_truth,
            failure_policy: self.batch.failure_policy,
        }
    }
}

const fn default_max_evals() -> usize {
    50
}

const fn default_seed() -> u64 {
    42
}

const fn default_true() -> bool {
    true
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("with_gt")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("results")
}

#[allow(clippy::unnecessary_wraps)]
fn default_table_path() -> Option<PathBuf> {
    Some(PathBuf::from("results/summary.csv"))
}

const fn default_min_level() -> LogLevel {
    LogLevel::Info
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn empty_document_uses_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        let settings = config.cash_settings();
        assert_eq!(settings, CashSettings::default());
        assert_eq!(config.candidate_space().unwrap().len(), 9);
        assert_eq!(config.batch_settings().failure_policy, FailurePolicy::Isolate);
    }

    #[test]
    fn sections_map_onto_settings() {
        let config = EngineConfig::from_toml(
            r#"
            [search]
            max_evals = 12
            seed = 7
            sampler = "random"
            objective = "roc_auc"
            holdout_ratio = 0.25
            max_trial_seconds = 1.5
            families = ["knn", "lof"]

            [batch]
            ground_truth = false
            failure_policy = "abort"

            [telemetry]
            min_level = "DEBUG"
            "#,
        )
        .unwrap();
        let settings = config.cash_settings();
        assert_eq!(settings.max_evals, 12);
        assert_eq!(settings.sampler, SamplerKind::Random);
        assert_eq!(settings.objective, Objective::RocAuc);
        assert_eq!(settings.validation, Validation::Holdout { ratio: 0.25 });
        assert_eq!(settings.max_trial_duration, Some(Duration::from_millis(1500)));
        assert_eq!(config.candidate_space().unwrap().len(), 2);
        assert!(!config.batch_settings().ground_truth);
        assert_eq!(config.telemetry.min_level, LogLevel::Debug);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(EngineConfig::from_toml("[search]\nmax_evals = 0").is_err());
        assert!(EngineConfig::from_toml("[search]\nfamilies = []").is_err());
        assert!(EngineConfig::from_toml("[search]\nholdout_ratio = 0.95").is_err());
        assert!(EngineConfig::from_toml("[search]\nmax_trial_seconds = 0.0").is_err());
        assert!(EngineConfig::from_toml("[search]\nfamilies = [\"svm\"]").is_err());
        assert!(EngineConfig::from_toml("[search]\nsampler = \"grid\"").is_err());
    }

    #[test]
    fn relative_paths_resolve_against_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("odds.toml");
        fs::write(
            &path,
            "[batch]\ndata_dir = \"data\"\n[telemetry]\nlog_path = \"logs/engine.jsonl\"\n",
        )
        .unwrap();
        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.batch.data_dir, dir.path().join("data"));
        assert_eq!(config.batch.report_dir, dir.path().join("results"));
        assert_eq!(
            config.telemetry.log_path,
            Some(dir.path().join("logs/engine.jsonl"))
        );
        assert!(EngineConfig::load(dir.path().join("missing.toml")).is_err());
    }
}
