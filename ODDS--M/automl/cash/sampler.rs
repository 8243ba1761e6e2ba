//! Proposal strategies for the search loop.

use std::{f64::consts::PI, fmt, str::FromStr};

use rand::{rngs::SmallRng, Rng};
use serde::{Deserialize, Serialize};

use super::trial::TrialResult;
use crate::{
    errors::{EngineError, EngineResult},
    space::{
        CandidateConfiguration, CandidateFamily, CandidateSpace, HyperParams, ParameterDomain,
        ParameterValue,
    },
};

/// Proposes the next configuration from the history of earlier trials.
pub trait Sampler: fmt::Debug + Send {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Next configuration to try. All randomness must come from `rng`.
    fn propose(
        &mut self,
        space: &CandidateSpace,
        history: &[TrialResult],
        rng: &mut SmallRng,
    ) -> EngineResult<CandidateConfiguration>;
}

/// Which sampler a search uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplerKind {
    /// Uniform random search.
    Random,
    /// Tree-structured Parzen estimator.
    #[default]
    Tpe,
}

impl SamplerKind {
    /// Fresh sampler with default settings.
    #[must_use]
    pub fn build(self) -> Box<dyn Sampler> {
        match self {
            Self::Random => Box::new(RandomSampler),
            Self::Tpe => Box::new(TpeSampler::default()),
        }
    }
}

impl fmt::Display for SamplerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Random => "random",
            Self::Tpe => "tpe",
        })
    }
}

impl FromStr for SamplerKind {
    type Err = EngineError;

    fn from_str(raw: &str) -> EngineResult<Self> {
        match raw {
            "random" => Ok(Self::Random),
            "tpe" => Ok(Self::Tpe),
            other => Err(EngineError::Configuration(format!("unknown sampler `{other}`"))),
        }
    }
}

fn pick_family<'a>(space: &'a CandidateSpace, rng: &mut SmallRng) -> EngineResult<&'a CandidateFamily> {
    let len = space.len();
    if len == 0 {
        return Err(EngineError::Configuration("candidate space is empty".into()));
    }
    space
        .families()
        .nth(rng.gen_range(0..len))
        .ok_or_else(|| EngineError::Configuration("candidate space is empty".into()))
}

/// Uniform family, then every parameter drawn independently.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomSampler;

impl Sampler for RandomSampler {
    fn name(&self) -> &'static str {
        "random"
    }

    fn propose(
        &mut self,
        space: &CandidateSpace,
        _history: &[TrialResult],
        rng: &mut SmallRng,
    ) -> EngineResult<CandidateConfiguration> {
        let family = pick_family(space, rng)?;
        Ok(CandidateConfiguration {
            family: family.id().to_string(),
            params: family.space().sample(rng),
        })
    }
}

/// Tree-structured Parzen estimator over family choice and per-family parameters.
///
/// Scored trials are split into the best `gamma` fraction ("good") and the rest. The
/// family is drawn with Laplace-smoothed good/bad ratios; continuous parameters take
/// the best `l(x) / g(x)` of a handful of KDE draws around good values; discrete and
/// categorical parameters use smoothed count ratios.
#[derive(Debug, Clone)]
pub struct TpeSampler {
    n_startup: usize,
    gamma: f64,
    n_candidates: usize,
}

impl Default for TpeSampler {
    fn default() -> Self {
        Self {
            n_startup: 5,
            gamma: 0.25,
            n_candidates: 24,
        }
    }
}

impl TpeSampler {
    /// Number of random proposals before modelling starts.
    #[must_use]
    pub fn with_startup(mut self, n: usize) -> Self {
        self.n_startup = n.max(1);
        self
    }

    /// Fraction of scored trials counted as good.
    #[must_use]
    pub fn with_gamma(mut self, gamma: f64) -> Self {
        self.gamma = gamma.clamp(0.01, 0.99);
        self
    }

    fn split<'h>(&self, history: &'h [TrialResult]) -> (Vec<&'h TrialResult>, Vec<&'h TrialResult>) {
        let mut scored: Vec<(&TrialResult, f64)> = history
            .iter()
            .filter_map(|trial| trial.quality().map(|q| (trial, q)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.index.cmp(&b.0.index)));
        let n_good = ((scored.len() as f64) * self.gamma).ceil() as usize;
        let n_good = n_good.clamp(1, scored.len().saturating_sub(1).max(1));
        let bad = scored.split_off(n_good.min(scored.len()));
        (
            scored.into_iter().map(|(trial, _)| trial).collect(),
            bad.into_iter().map(|(trial, _)| trial).collect(),
        )
    }

    fn choose_family<'a>(
        space: &'a CandidateSpace,
        good: &[&TrialResult],
        bad: &[&TrialResult],
        rng: &mut SmallRng,
    ) -> EngineResult<&'a CandidateFamily> {
        let count = |trials: &[&TrialResult], id: &str| {
            trials.iter().filter(|t| t.configuration.family == id).count() as f64
        };
        let weights: Vec<f64> = space
            .families()
            .map(|family| (count(good, family.id()) + 1.0) / (count(bad, family.id()) + 1.0))
            .collect();
        let idx = weighted_index(&weights, rng);
        space
            .families()
            .nth(idx)
            .ok_or_else(|| EngineError::Configuration("candidate space is empty".into()))
    }

    fn sample_param(
        &self,
        name: &str,
        domain: &ParameterDomain,
        good: &[&TrialResult],
        bad: &[&TrialResult],
        rng: &mut SmallRng,
    ) -> ParameterValue {
        let values = |trials: &[&TrialResult]| -> Vec<ParameterValue> {
            trials
                .iter()
                .filter_map(|t| t.configuration.params.get(name).cloned())
                .collect()
        };
        let (good_values, bad_values) = (values(good), values(bad));
        if good_values.is_empty() {
            return domain.sample(rng);
        }
        match domain {
            ParameterDomain::Continuous {
                low,
                high,
                log_scale,
            } => {
                let warp = |v: f64| if *log_scale { v.max(f64::MIN_POSITIVE).ln() } else { v };
                let floats = |vals: &[ParameterValue]| -> Vec<f64> {
                    vals.iter().filter_map(ParameterValue::as_float).map(warp).collect()
                };
                let picked = self.sample_continuous(
                    &floats(&good_values),
                    &floats(&bad_values),
                    warp(*low),
                    warp(*high),
                    rng,
                );
                let value = if *log_scale { picked.exp() } else { picked };
                ParameterValue::Float(value.clamp(*low, *high))
            }
            ParameterDomain::Discrete { low, high } => {
                let span = usize::try_from(high - low).unwrap_or(0) + 1;
                let slot = |v: &ParameterValue| {
                    v.as_int()
                        .filter(|i| (low..=high).contains(&i))
                        .and_then(|i| usize::try_from(i - low).ok())
                };
                let idx = ratio_draw(span, &good_values, &bad_values, slot, rng);
                ParameterValue::Int(low + i64::try_from(idx).unwrap_or(0))
            }
            ParameterDomain::Categorical { choices } => {
                let slot = |v: &ParameterValue| {
                    v.as_str().and_then(|s| choices.iter().position(|c| c == s))
                };
                let idx = ratio_draw(choices.len(), &good_values, &bad_values, slot, rng);
                ParameterValue::Categorical(choices[idx].clone())
            }
        }
    }

    fn sample_continuous(
        &self,
        good: &[f64],
        bad: &[f64],
        low: f64,
        high: f64,
        rng: &mut SmallRng,
    ) -> f64 {
        if good.is_empty() || high <= low {
            return low + rng.gen::<f64>() * (high - low);
        }
        let bandwidth = (high - low) / 10.0;
        let mut best = (low, f64::NEG_INFINITY);
        for _ in 0..self.n_candidates {
            let base = good[rng.gen_range(0..good.len())];
            // Box-Muller
            let u1: f64 = rng.gen::<f64>().max(1e-10);
            let u2: f64 = rng.gen();
            let noise = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos() * bandwidth;
            let candidate = (base + noise).clamp(low, high);
            let ratio = kde(candidate, good, bandwidth) / (kde(candidate, bad, bandwidth) + 1e-10);
            if ratio > best.1 {
                best = (candidate, ratio);
            }
        }
        best.0
    }
}

fn kde(x: f64, values: &[f64], bandwidth: f64) -> f64 {
    if values.is_empty() {
        return 1.0;
    }
    values
        .iter()
        .map(|&v| (-(x - v).powi(2) / (2.0 * bandwidth.powi(2))).exp())
        .sum::<f64>()
        / values.len() as f64
}

/// Draws a slot with probability proportional to smoothed `good / bad` counts.
fn ratio_draw(
    slots: usize,
    good: &[ParameterValue],
    bad: &[ParameterValue],
    slot: impl Fn(&ParameterValue) -> Option<usize>,
    rng: &mut SmallRng,
) -> usize {
    let mut good_counts = vec![1.0; slots];
    let mut bad_counts = vec![1.0; slots];
    for idx in good.iter().filter_map(&slot) {
        good_counts[idx] += 1.0;
    }
    for idx in bad.iter().filter_map(&slot) {
        bad_counts[idx] += 1.0;
    }
    let weights: Vec<f64> = good_counts
        .iter()
        .zip(&bad_counts)
        .map(|(l, g)| l / g)
        .collect();
    weighted_index(&weights, rng)
}

fn weighted_index(weights: &[f64], rng: &mut SmallRng) -> usize {
    let total: f64 = weights.iter().sum();
    let mut draw = rng.gen::<f64>() * total;
    for (idx, weight) in weights.iter().enumerate() {
        if draw < *weight {
            return idx;
        }
        draw -= weight;
    }
    weights.len().saturating_sub(1)
}

impl Sampler for TpeSampler {
    fn name(&self) -> &'static str {
        "tpe"
    }

    fn propose(
        &mut self,
        space: &CandidateSpace,
        history: &[TrialResult],
        rng: &mut SmallRng,
    ) -> EngineResult<CandidateConfiguration> {
        let scored = history.iter().filter(|t| t.quality().is_some()).count();
        if scored < self.n_startup.max(2) {
            return RandomSampler.propose(space, history, rng);
        }
        let (good, bad) = self.split(history);
        let family = Self::choose_family(space, &good, &bad, rng)?;
        let good: Vec<&TrialResult> = good
            .into_iter()
            .filter(|t| t.configuration.family == family.id())
            .collect();
        let bad: Vec<&TrialResult> = bad
            .into_iter()
            .filter(|t| t.configuration.family == family.id())
            .collect();
        let params: HyperParams = family
            .space()
            .iter()
            .map(|(name, domain)| {
                (
                    name.clone(),
                    self.sample_param(name, domain, &good, &bad, rng),
                )
            })
            .collect();
        Ok(CandidateConfiguration {
            family: family.id().to_string(),
            params,
        })
    }
}
