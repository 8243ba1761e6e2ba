use std::fmt;

use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::{EngineError, EngineResult};

/// A sampled hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    /// Real-valued setting.
    Float(f64),
    /// Integer setting.
    Int(i64),
    /// One of a fixed set of names.
    Categorical(String),
}

impl ParameterValue {
    /// Numeric view; integers widen to floats.
    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Categorical(_) => None,
        }
    }

    /// Integer view; floats are truncated.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            Self::Categorical(_) => None,
        }
    }

    /// Choice name, for categorical values only.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Categorical(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v:.4}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Categorical(s) => write!(f, "'{s}'"),
        }
    }
}

/// Range or choice set a hyperparameter is drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterDomain {
    /// Closed real interval, optionally sampled on a log scale.
    Continuous {
        /// Lower bound.
        low: f64,
        /// Upper bound.
        high: f64,
        /// Sample uniformly in `ln` space.
        log_scale: bool,
    },
    /// Closed integer interval.
    Discrete {
        /// Lower bound.
        low: i64,
        /// Upper bound.
        high: i64,
    },
    /// Named choices.
    Categorical {
        /// Allowed names.
        choices: Vec<String>,
    },
}

impl ParameterDomain {
    /// Linear continuous domain.
    #[must_use]
    pub const fn continuous(low: f64, high: f64) -> Self {
        Self::Continuous {
            low,
            high,
            log_scale: false,
        }
    }

    /// Integer domain.
    #[must_use]
    pub const fn discrete(low: i64, high: i64) -> Self {
        Self::Discrete { low, high }
    }

    /// Categorical domain.
    #[must_use]
    pub fn categorical(choices: &[&str]) -> Self {
        Self::Categorical {
            choices: choices.iter().map(|c| (*c).to_string()).collect(),
        }
    }

    /// Uniform draw.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> ParameterValue {
        match self {
            Self::Continuous {
                low,
                high,
                log_scale,
            } => {
                let value = if *log_scale {
                    let (lo, hi) = (low.max(f64::MIN_POSITIVE).ln(), high.max(f64::MIN_POSITIVE).ln());
                    (lo + rng.gen::<f64>() * (hi - lo)).exp()
                } else {
                    low + rng.gen::<f64>() * (high - low)
                };
                ParameterValue::Float(value.clamp(*low, *high))
            }
            Self::Discrete { low, high } => ParameterValue::Int(rng.gen_range(*low..=*high)),
            Self::Categorical { choices } => {
                ParameterValue::Categorical(choices[rng.gen_range(0..choices.len())].clone())
            }
        }
    }

    /// True when `value` has the right kind and lies inside the domain.
    #[must_use]
    pub fn contains(&self, value: &ParameterValue) -> bool {
        match (self, value) {
            (Self::Continuous { low, high, .. }, ParameterValue::Float(v)) => v >= low && v <= high,
            (Self::Discrete { low, high }, ParameterValue::Int(v)) => v >= low && v <= high,
            (Self::Categorical { choices }, ParameterValue::Categorical(s)) => choices.contains(s),
            _ => false,
        }
    }

    fn check(&self, name: &str) -> EngineResult<()> {
        let valid = match self {
            Self::Continuous {
                low,
                high,
                log_scale,
            } => low.is_finite() && high.is_finite() && low <= high && (!log_scale || *low > 0.0),
            Self::Discrete { low, high } => low <= high,
            Self::Categorical { choices } => !choices.is_empty(),
        };
        if valid {
            Ok(())
        } else {
            Err(EngineError::Configuration(format!(
                "parameter `{name}` has an empty or invalid domain"
            )))
        }
    }
}

impl fmt::Display for ParameterDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continuous {
                low,
                high,
                log_scale: true,
            } => write!(f, "log-uniform[{low}, {high}]"),
            Self::Continuous { low, high, .. } => write!(f, "uniform[{low}, {high}]"),
            Self::Discrete { low, high } => write!(f, "int[{low}, {high}]"),
            Self::Categorical { choices } => write!(f, "{{{}}}", choices.join(", ")),
        }
    }
}

/// Hyperparameter assignment, ordered as the family declares its parameters.
pub type HyperParams = IndexMap<String, ParameterValue>;

/// Named domains of one family, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpace {
    domains: IndexMap<String, ParameterDomain>,
}

impl ParameterSpace {
    /// Empty space.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a parameter, validating its domain.
    pub fn with(mut self, name: &str, domain: ParameterDomain) -> EngineResult<Self> {
        domain.check(name)?;
        self.domains.insert(name.to_string(), domain);
        Ok(self)
    }

    /// Domain of `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ParameterDomain> {
        self.domains.get(name)
    }

    /// Parameters in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParameterDomain)> {
        self.domains.iter()
    }

    /// Number of parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    /// True when the family has no tunables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Independent uniform draw of every parameter.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> HyperParams {
        self.domains
            .iter()
            .map(|(name, domain)| (name.clone(), domain.sample(rng)))
            .collect()
    }

    /// Rejects assignments with missing, unknown or out-of-domain parameters.
    pub fn validate(&self, params: &HyperParams) -> EngineResult<()> {
        for (name, domain) in &self.domains {
            match params.get(name) {
                Some(value) if domain.contains(value) => {}
                Some(value) => {
                    return Err(EngineError::Configuration(format!(
                        "parameter `{name}` = {value} outside {domain}"
                    )))
                }
                None => {
                    return Err(EngineError::Configuration(format!(
                        "parameter `{name}` missing"
                    )))
                }
            }
        }
        if let Some(extra) = params.keys().find(|key| !self.domains.contains_key(*key)) {
            return Err(EngineError::Configuration(format!(
                "unknown parameter `{extra}`"
            )));
        }
        Ok(())
    }
}

/// Typed lookups used by detector factories.
pub(crate) trait ParamLookup {
    fn float(&self, name: &str) -> EngineResult<f64>;
    fn int(&self, name: &str) -> EngineResult<i64>;
    fn choice(&self, name: &str) -> EngineResult<&str>;

    fn count(&self, name: &str) -> EngineResult<usize> {
        let value = self.int(name)?;
        usize::try_from(value).map_err(|_| {
            EngineError::Configuration(format!("parameter `{name}` = {value} must be non-negative"))
        })
    }
}

fn missing(name: &str, kind: &str) -> EngineError {
    EngineError::Configuration(format!("parameter `{name}` missing or not {kind}"))
}

impl ParamLookup for HyperParams {
    fn float(&self, name: &str) -> EngineResult<f64> {
        self.get(name)
            .and_then(ParameterValue::as_float)
            .ok_or_else(|| missing(name, "numeric"))
    }

    fn int(&self, name: &str) -> EngineResult<i64> {
        self.get(name)
            .and_then(ParameterValue::as_int)
            .ok_or_else(|| missing(name, "an integer"))
    }

    fn choice(&self, name: &str) -> EngineResult<&str> {
        self.get(name)
            .and_then(ParameterValue::as_str)
            .ok_or_else(|| missing(name, "categorical"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, SeedableRng};

    fn space() -> ParameterSpace {
        ParameterSpace::new()
            .with("n", ParameterDomain::discrete(2, 4))
            .unwrap()
            .with("rate", ParameterDomain::continuous(0.1, 0.2))
            .unwrap()
            .with("mode", ParameterDomain::categorical(&["a", "b"]))
            .unwrap()
    }

    #[test]
    fn samples_stay_inside_domains() {
        let space = space();
        let mut rng = SmallRng::seed_from_u64(3);
        for _ in 0..200 {
            let params = space.sample(&mut rng);
            space.validate(&params).unwrap();
            assert_eq!(params.keys().collect::<Vec<_>>(), ["n", "rate", "mode"]);
        }
    }

    #[test]
    fn log_scale_requires_positive_bounds() {
        let bad = ParameterDomain::Continuous {
            low: 0.0,
            high: 1.0,
            log_scale: true,
        };
        assert!(ParameterSpace::new().with("x", bad).is_err());
        assert!(ParameterSpace::new()
            .with("c", ParameterDomain::Categorical { choices: vec![] })
            .is_err());
    }

    #[test]
    fn validate_flags_unknown_and_out_of_range() {
        let space = space();
        let mut params = space.sample(&mut SmallRng::seed_from_u64(1));
        params.insert("n".into(), ParameterValue::Int(9));
        assert!(space.validate(&params).is_err());
        params.insert("n".into(), ParameterValue::Int(3));
        params.insert("extra".into(), ParameterValue::Int(1));
        assert!(space.validate(&params).is_err());
    }

    #[test]
    fn lookups_convert_and_report_missing() {
        let mut params = HyperParams::new();
        params.insert("k".into(), ParameterValue::Int(5));
        params.insert("m".into(), ParameterValue::Categorical("mean".into()));
        assert_eq!(params.count("k").unwrap(), 5);
        assert_eq!(params.float("k").unwrap(), 5.0);
        assert_eq!(params.choice("m").unwrap(), "mean");
        assert!(params.float("absent").is_err());
        params.insert("neg".into(), ParameterValue::Int(-1));
        assert!(params.count("neg").is_err());
    }

    #[test]
    fn values_render_compactly() {
        assert_eq!(ParameterValue::Float(0.05).to_string(), "0.0500");
        assert_eq!(ParameterValue::Categorical("mean".into()).to_string(), "'mean'");
        assert_eq!(ParameterDomain::discrete(1, 8).to_string(), "int[1, 8]");
    }
}
