use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    dataset::GroundTruth,
    errors::{EngineError, EngineResult},
    evaluation::metrics::{polarity_corrected, roc_auc, ConfusionMatrix},
};

/// Supervised quality measure maximised by the search when labels are available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// F1 of predicted labels.
    #[default]
    F1,
    /// Polarity-corrected ROC-AUC of scores.
    RocAuc,
}

impl Objective {
    /// Quality of one trial's outputs on the scoring rows.
    pub fn score(self, truth: &GroundTruth, predictions: &[u8], scores: &[f64]) -> EngineResult<f64> {
        match self {
            Self::F1 => Ok(ConfusionMatrix::from_labels(truth.as_slice(), predictions)?.f1()),
            Self::RocAuc => Ok(polarity_corrected(roc_auc(truth.as_slice(), scores)?)),
        }
    }

    /// Whether the objective is computable for `truth` at all.
    pub fn check_labels(self, truth: &GroundTruth) -> EngineResult<()> {
        if self == Self::RocAuc && truth.is_single_class() {
            return Err(EngineError::undefined(
                "roc_auc",
                format!(
                    "validation labels have a single class ({} anomalies in {} rows)",
                    truth.anomalies(),
                    truth.len()
                ),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::F1 => "f1",
            Self::RocAuc => "roc_auc",
        })
    }
}

impl FromStr for Objective {
    type Err = EngineError;

    fn from_str(raw: &str) -> EngineResult<Self> {
        match raw {
            "f1" => Ok(Self::F1),
            "roc_auc" | "auc" => Ok(Self::RocAuc),
            other => Err(EngineError::Configuration(format!("unknown objective `{other}`"))),
        }
    }
}

/// Label-free quality: gap between mean flagged and mean unflagged score, in units of the
/// score standard deviation. `None` when either group is empty or scores are constant.
#[must_use]
pub fn separation(scores: &[f64], predictions: &[u8]) -> Option<f64> {
    if scores.len() != predictions.len() || scores.is_empty() {
        return None;
    }
    let mean = |flag: u8| -> Option<f64> {
        let picked: Vec<f64> = scores
            .iter()
            .zip(predictions)
            .filter(|&(_, &p)| p == flag)
            .map(|(&s, _)| s)
            .collect();
        (!picked.is_empty()).then(|| picked.iter().sum::<f64>() / picked.len() as f64)
    };
    let n = scores.len() as f64;
    let overall = scores.iter().sum::<f64>() / n;
    let std = (scores.iter().map(|s| (s - overall).powi(2)).sum::<f64>() / n).sqrt();
    if !(std.is_finite() && std > 0.0) {
        return None;
    }
    let gap = (mean(1)? - mean(0)?) / std;
    gap.is_finite().then_some(gap)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f1_objective_uses_predicted_labels() {
        let truth = GroundTruth::new(vec![0, 0, 1, 1]).unwrap();
        let quality = Objective::F1.score(&truth, &[0, 0, 1, 0], &[0.0; 4]).unwrap();
        assert!((quality - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn auc_objective_is_polarity_corrected() {
        let truth = GroundTruth::new(vec![0, 0, 1, 1]).unwrap();
        let quality = Objective::RocAuc
            .score(&truth, &[0; 4], &[0.9, 0.8, 0.1, 0.2])
            .unwrap();
        assert_eq!(quality, 1.0);
        let single = GroundTruth::new(vec![0, 0]).unwrap();
        assert!(Objective::RocAuc.check_labels(&single).is_err());
        assert!(Objective::F1.check_labels(&single).is_ok());
    }

    #[test]
    fn separation_rewards_distinct_flagged_scores() {
        let wide = separation(&[0.0, 0.1, 0.0, 5.0], &[0, 0, 0, 1]).unwrap();
        let narrow = separation(&[0.0, 0.1, 0.0, 0.2], &[0, 0, 0, 1]).unwrap();
        assert!(wide > 0.0 && narrow > 0.0);
        assert!(separation(&[1.0, 1.0], &[0, 1]).is_none());
        assert!(separation(&[0.0, 1.0], &[0, 0]).is_none());
    }

    #[test]
    fn parses_names() {
        assert_eq!("roc_auc".parse::<Objective>().unwrap(), Objective::RocAuc);
        assert_eq!(Objective::F1.to_string(), "f1");
        assert!("mcc".parse::<Objective>().is_err());
    }
}
