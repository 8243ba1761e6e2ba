use std::{fmt::Write as _, time::Duration};

use serde::{Deserialize, Serialize};

use crate::space::CandidateConfiguration;

/// What a single trial produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum TrialOutcome {
    /// Fitted and scored; higher is better.
    Scored(f64),
    /// Fitted, but no quality could be computed.
    Unscored,
    /// Fitting or scoring raised an error.
    Failed(String),
}

/// One fit-and-score attempt. The fitted model itself is not retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    /// Zero-based attempt number.
    pub index: usize,
    /// Configuration tried.
    pub configuration: CandidateConfiguration,
    /// Seed handed to the detector, so the trial can be rebuilt exactly.
    pub seed: u64,
    /// Result of the attempt.
    pub outcome: TrialOutcome,
    /// Wall-clock time of fit plus scoring.
    #[serde(with = "duration_secs")]
    pub elapsed: Duration,
}

impl TrialResult {
    /// Quality when scored.
    #[must_use]
    pub const fn quality(&self) -> Option<f64> {
        match self.outcome {
            TrialOutcome::Scored(value) => Some(value),
            _ => None,
        }
    }

    /// True unless the attempt failed.
    #[must_use]
    pub const fn succeeded(&self) -> bool {
        !matches!(self.outcome, TrialOutcome::Failed(_))
    }

    /// One log line: `trial 003 | knn(...) | quality=0.812500 | 0.012s`.
    #[must_use]
    pub fn log_line(&self) -> String {
        let result = match &self.outcome {
            TrialOutcome::Scored(value) => format!("quality={value:.6}"),
            TrialOutcome::Unscored => "quality=unscored".to_string(),
            TrialOutcome::Failed(reason) => format!("FAILED: {reason}"),
        };
        format!(
            "trial {:03} | {} | {} | {:.3}s",
            self.index,
            self.configuration,
            result,
            self.elapsed.as_secs_f64()
        )
    }
}

/// Winner among `trials`: highest quality with the earliest index on ties; when nothing
/// was scored, the earliest successful trial. `None` when every trial failed.
#[must_use]
pub fn select_best(trials: &[TrialResult]) -> Option<&TrialResult> {
    let mut best: Option<(&TrialResult, f64)> = None;
    for trial in trials {
        if let Some(quality) = trial.quality() {
            if best.map_or(true, |(_, top)| quality > top) {
                best = Some((trial, quality));
            }
        }
    }
    best.map(|(trial, _)| trial)
        .or_else(|| trials.iter().find(|trial| trial.succeeded()))
}

/// Renders the audit log: header, one line per attempt, and the winner.
#[must_use]
pub fn render_log(header: &str, trials: &[TrialResult], best: &TrialResult) -> String {
    let mut log = String::new();
    let _ = writeln!(log, "{header}");
    for trial in trials {
        let _ = writeln!(log, "{}", trial.log_line());
    }
    let failed = trials.iter().filter(|trial| !trial.succeeded()).count();
    let quality = best
        .quality()
        .map_or_else(|| "unscored".to_string(), |q| format!("{q:.6}"));
    let _ = writeln!(
        log,
        "best: trial {:03} | {} | quality={} | failed trials: {}/{}",
        best.index,
        best.configuration,
        quality,
        failed,
        trials.len()
    );
    log
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::from_secs_f64(secs.max(0.0)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::space::HyperParams;

    pub(crate) fn trial(index: usize, outcome: TrialOutcome) -> TrialResult {
        TrialResult {
            index,
            configuration: CandidateConfiguration {
                family: "knn".into(),
                params: HyperParams::new(),
            },
            seed: index as u64,
            outcome,
            elapsed: Duration::from_millis(5),
        }
    }

    #[test]
    fn earliest_trial_wins_ties() {
        let trials = vec![
            trial(0, TrialOutcome::Scored(0.4)),
            trial(1, TrialOutcome::Scored(0.9)),
            trial(2, TrialOutcome::Failed("singular".into())),
            trial(3, TrialOutcome::Scored(0.9)),
        ];
        assert_eq!(select_best(&trials).map(|t| t.index), Some(1));
    }

    #[test]
    fn unscored_falls_back_to_first_success() {
        let trials = vec![
            trial(0, TrialOutcome::Failed("x".into())),
            trial(1, TrialOutcome::Unscored),
            trial(2, TrialOutcome::Unscored),
        ];
        assert_eq!(select_best(&trials).map(|t| t.index), Some(1));
        let failed = vec![trial(0, TrialOutcome::Failed("x".into()))];
        assert!(select_best(&failed).is_none());
    }

    #[test]
    fn log_lists_every_attempt_and_the_winner() {
        let trials = vec![
            trial(0, TrialOutcome::Scored(0.25)),
            trial(1, TrialOutcome::Failed("too few rows".into())),
        ];
        let log = render_log("search", &trials, &trials[0]);
        let lines: Vec<&str> = log.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[1].starts_with("trial 000 | knn() | quality=0.250000"));
        assert!(lines[2].contains("FAILED: too few rows"));
        assert!(lines[3].starts_with("best: trial 000"));
        assert!(lines[3].ends_with("failed trials: 1/2"));
    }
}
