//! Budgeted combined algorithm selection and hyperparameter search.

/// Trial quality measures.
pub mod objective;
/// Configuration proposal strategies.
pub mod sampler;
/// Trial records, winner selection and the audit log.
pub mod trial;

use std::{
    borrow::Cow,
    time::{Duration, Instant},
};

use rand::{rngs::SmallRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::{
    dataset::{Dataset, GroundTruth, Validation},
    detectors::Detector,
    errors::{EngineError, EngineResult},
    space::{CandidateConfiguration, CandidateSpace},
    telemetry::{EngineEvent, EngineTelemetry},
};

pub use objective::{separation, Objective};
pub use sampler::{RandomSampler, Sampler, SamplerKind, TpeSampler};
pub use trial::{render_log, select_best, TrialOutcome, TrialResult};

/// Knobs of one search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashSettings {
    /// Exact number of trial attempts.
    pub max_evals: usize,
    /// Master seed for proposals and detector seeds.
    pub seed: u64,
    /// Row split applied identically to every trial.
    pub validation: Validation,
    /// Supervised objective used when labels are present.
    pub objective: Objective,
    /// Proposal strategy.
    pub sampler: SamplerKind,
    /// Trials running longer than this are recorded as failed.
    pub max_trial_duration: Option<Duration>,
}

impl Default for CashSettings {
    fn default() -> Self {
        Self {
            max_evals: 50,
            seed: 42,
            validation: Validation::FullData,
            objective: Objective::F1,
            sampler: SamplerKind::Tpe,
            max_trial_duration: None,
        }
    }
}

/// Result of a search: the retrained winner plus the full trial record.
#[derive(Debug)]
pub struct SearchOutcome {
    /// Winning configuration, fitted on every row of the dataset.
    pub model: Box<dyn Detector>,
    /// Winning trial.
    pub best: TrialResult,
    /// Every attempt in order.
    pub trials: Vec<TrialResult>,
    /// Rendered audit log.
    pub log: String,
    /// Time spent retraining the winner.
    pub retrain_elapsed: Duration,
}

impl SearchOutcome {
    /// Number of failed attempts.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.trials.iter().filter(|trial| !trial.succeeded()).count()
    }
}

/// Search controller over a candidate space.
#[derive(Debug, Clone)]
pub struct Cash {
    space: CandidateSpace,
    settings: CashSettings,
    telemetry: Option<EngineTelemetry>,
}

impl Cash {
    /// Creates a controller.
    #[must_use]
    pub const fn new(space: CandidateSpace, settings: CashSettings) -> Self {
        Self {
            space,
            settings,
            telemetry: None,
        }
    }

    /// Attaches telemetry sinks.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: EngineTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Active settings.
    #[must_use]
    pub const fn settings(&self) -> &CashSettings {
        &self.settings
    }

    /// Candidate space searched.
    #[must_use]
    pub const fn space(&self) -> &CandidateSpace {
        &self.space
    }

    fn record(&self, event: &EngineEvent) {
        if let Some(tel) = &self.telemetry {
            tel.record(event);
        }
    }

    /// Runs exactly `max_evals` trials and returns the winner retrained on all of `data`.
    ///
    /// Individual trial failures are recorded and do not stop the loop. Fails with
    /// `SearchExhausted` when every trial failed.
    pub fn search(&self, data: &Dataset, labels: Option<&GroundTruth>) -> EngineResult<SearchOutcome> {
        let settings = &self.settings;
        if settings.max_evals == 0 {
            return Err(EngineError::Configuration(
                "max_evals must be at least 1".into(),
            ));
        }
        if self.space.is_empty() {
            return Err(EngineError::Configuration("candidate space is empty".into()));
        }
        if let Some(truth) = labels {
            truth.check_against(data)?;
        }
        let (fit_rows, score_rows) = settings.validation.split(data.n_rows())?;
        let (fit_data, score_data): (Cow<'_, Dataset>, Cow<'_, Dataset>) =
            match settings.validation {
                Validation::FullData => (Cow::Borrowed(data), Cow::Borrowed(data)),
                Validation::Holdout { .. } => (
                    Cow::Owned(data.select_rows(&fit_rows)?),
                    Cow::Owned(data.select_rows(&score_rows)?),
                ),
            };
        let score_labels = labels.map(|truth| truth.select(&score_rows));
        if let Some(truth) = &score_labels {
            settings.objective.check_labels(truth)?;
        }

        let mut sampler = settings.sampler.build();
        let header = format!(
            "search | max_evals={} | sampler={} | objective={} | validation={} | seed={}",
            settings.max_evals,
            sampler.name(),
            self.objective_name(labels.is_some()),
            settings.validation.describe(),
            settings.seed
        );
        self.record(&EngineEvent::SearchStarted {
            max_evals: settings.max_evals,
            sampler: sampler.name().to_string(),
            objective: self.objective_name(labels.is_some()).to_string(),
            validation: settings.validation.describe(),
            seed: settings.seed,
        });

        let mut rng = SmallRng::seed_from_u64(settings.seed);
        let mut trials: Vec<TrialResult> = Vec::with_capacity(settings.max_evals);
        for index in 0..settings.max_evals {
            let configuration = sampler.propose(&self.space, &trials, &mut rng)?;
            let seed: u64 = rng.gen();
            let started = Instant::now();
            let attempt = self.run_trial(&configuration, seed, &fit_data, &score_data, score_labels.as_ref());
            let elapsed = started.elapsed();
            let outcome = match attempt {
                Ok(_) if settings.max_trial_duration.is_some_and(|cap| elapsed > cap) => {
                    TrialOutcome::Failed(format!(
                        "exceeded trial time cap ({:.3}s)",
                        elapsed.as_secs_f64()
                    ))
                }
                Ok(outcome) => outcome,
                Err(err) => TrialOutcome::Failed(err.to_string()),
            };
            let trial = TrialResult {
                index,
                configuration,
                seed,
                outcome,
                elapsed,
            };
            self.record(&match &trial.outcome {
                TrialOutcome::Failed(reason) => EngineEvent::TrialFailed {
                    trial: index,
                    configuration: trial.configuration.to_string(),
                    reason: reason.clone(),
                },
                _ => EngineEvent::TrialCompleted {
                    trial: index,
                    configuration: trial.configuration.to_string(),
                    quality: trial.quality(),
                    elapsed_secs: elapsed.as_secs_f64(),
                },
            });
            trials.push(trial);
        }

        let best = select_best(&trials)
            .cloned()
            .ok_or(EngineError::SearchExhausted {
                failed: trials.len(),
            })?;
        let (model, retrain_elapsed) = self.retrain(&best.configuration, best.seed, data)?;
        let log = render_log(&header, &trials, &best);
        let outcome = SearchOutcome {
            model,
            best,
            trials,
            log,
            retrain_elapsed,
        };
        self.record(&EngineEvent::SearchCompleted {
            best_trial: outcome.best.index,
            configuration: outcome.best.configuration.to_string(),
            quality: outcome.best.quality(),
            failed: outcome.failed(),
        });
        Ok(outcome)
    }

    const fn objective_name(&self, supervised: bool) -> &'static str {
        match (supervised, self.settings.objective) {
            (false, _) => "separation",
            (true, Objective::F1) => "f1",
            (true, Objective::RocAuc) => "roc_auc",
        }
    }

    fn run_trial(
        &self,
        configuration: &CandidateConfiguration,
        seed: u64,
        fit_data: &Dataset,
        score_data: &Dataset,
        labels: Option<&GroundTruth>,
    ) -> EngineResult<TrialOutcome> {
        let mut model = self.space.instantiate(configuration, seed)?;
        model.fit(fit_data)?;
        let scores = model.decision_function(score_data)?;
        let predictions = model.predict(score_data)?;
        Ok(match labels {
            Some(truth) => TrialOutcome::Scored(self.settings.objective.score(truth, &predictions, &scores)?),
            None => separation(&scores, &predictions).map_or(TrialOutcome::Unscored, TrialOutcome::Scored),
        })
    }

    /// Rebuilds the winning configuration with its trial seed and fits it on every row.
    fn retrain(
        &self,
        configuration: &CandidateConfiguration,
        seed: u64,
        data: &Dataset,
    ) -> EngineResult<(Box<dyn Detector>, Duration)> {
        let started = Instant::now();
        let mut model = self.space.instantiate(configuration, seed)?;
        model.fit(data)?;
        Ok((model, started.elapsed()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labelled(rows: usize, anomalies: &[usize]) -> (Dataset, GroundTruth) {
        let data: Vec<Vec<f64>> = (0..rows)
            .map(|i| {
                if anomalies.contains(&i) {
                    vec![10.0 + i as f64 * 0.1, -10.0]
                } else {
                    let t = i as f64;
                    vec![(t * 0.37).sin(), (t * 0.91).cos()]
                }
            })
            .collect();
        let labels = (0..rows).map(|i| u8::from(anomalies.contains(&i))).collect();
        (
            Dataset::from_rows(&data).unwrap(),
            GroundTruth::new(labels).unwrap(),
        )
    }

    fn cash(max_evals: usize) -> Cash {
        Cash::new(
            CandidateSpace::default_space().unwrap(),
            CashSettings {
                max_evals,
                ..CashSettings::default()
            },
        )
    }

    #[test]
    fn zero_budget_fails_fast() {
        let (data, labels) = labelled(20, &[3]);
        let err = cash(0).search(&data, Some(&labels)).unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn empty_space_is_a_configuration_error() {
        let (data, _) = labelled(20, &[3]);
        let err = Cash::new(CandidateSpace::new(), CashSettings::default())
            .search(&data, None)
            .unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn runs_exactly_the_budget() {
        let (data, labels) = labelled(60, &[5, 30]);
        for budget in [1, 4, 9] {
            let outcome = cash(budget).search(&data, Some(&labels)).unwrap();
            assert_eq!(outcome.trials.len(), budget);
            assert_eq!(outcome.log.lines().filter(|l| l.starts_with("trial ")).count(), budget);
            assert!(outcome.log.lines().last().unwrap().starts_with("best: "));
        }
    }

    #[test]
    fn winner_is_retrained_on_all_rows() {
        let (data, _) = labelled(60, &[5, 30]);
        let settings = CashSettings {
            max_evals: 6,
            validation: Validation::Holdout { ratio: 0.5 },
            ..CashSettings::default()
        };
        let outcome = Cash::new(CandidateSpace::default_space().unwrap(), settings)
            .search(&data, None)
            .unwrap();
        assert_eq!(outcome.model.predict(&data).unwrap().len(), data.n_rows());
        assert_eq!(outcome.model.family(), outcome.best.configuration.family);
    }

    #[test]
    fn same_seed_same_winner() {
        let (data, labels) = labelled(50, &[7, 21, 40]);
        let a = cash(8).search(&data, Some(&labels)).unwrap();
        let b = cash(8).search(&data, Some(&labels)).unwrap();
        assert_eq!(a.best.configuration, b.best.configuration);
        assert_eq!(a.best.index, b.best.index);
    }

    #[test]
    fn all_failed_trials_exhaust_the_search() {
        // two rows: every family needs more to fit
        let data = Dataset::from_rows(&[vec![0.0, 1.0], vec![1.0, 0.0]]).unwrap();
        let space = CandidateSpace::default_space()
            .unwrap()
            .restricted(&["lof".to_string(), "robustcovariance".to_string()])
            .unwrap();
        let settings = CashSettings {
            max_evals: 5,
            ..CashSettings::default()
        };
        let err = Cash::new(space, settings).search(&data, None).unwrap_err();
        assert!(matches!(err, EngineError::SearchExhausted { failed: 5 }));
    }

    #[test]
    fn label_mismatch_and_single_class_auc_are_rejected() {
        let (data, _) = labelled(20, &[3]);
        let short = GroundTruth::new(vec![0; 19]).unwrap();
        assert!(matches!(
            cash(3).search(&data, Some(&short)).unwrap_err(),
            EngineError::DataShape { .. }
        ));
        let flat = GroundTruth::new(vec![0; 20]).unwrap();
        let settings = CashSettings {
            max_evals: 3,
            objective: Objective::RocAuc,
            ..CashSettings::default()
        };
        let err = Cash::new(CandidateSpace::default_space().unwrap(), settings)
            .search(&data, Some(&flat))
            .unwrap_err();
        assert!(matches!(err, EngineError::UndefinedMetric { .. }));
    }

    #[test]
    fn time_cap_marks_slow_trials_failed() {
        let (data, labels) = labelled(40, &[2]);
        let settings = CashSettings {
            max_evals: 3,
            max_trial_duration: Some(Duration::ZERO),
            ..CashSettings::default()
        };
        let err = Cash::new(CandidateSpace::default_space().unwrap(), settings)
            .search(&data, Some(&labels))
            .unwrap_err();
        assert!(matches!(err, EngineError::SearchExhausted { failed: 3 }));
    }
}
