//! Candidate families and their hyperparameter domains.

/// Parameter domains and sampled values.
pub mod params;

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    detectors::{
        Cblof, Contamination, Detector, Hbos, IsolationForest, Knn, Lof, OneClassSvm, Pca,
        RobustCovariance, Sod,
    },
    errors::{EngineError, EngineResult},
};

pub use params::{HyperParams, ParameterDomain, ParameterSpace, ParameterValue};
use params::ParamLookup;

/// Builds an unfitted detector from a validated assignment and a seed.
pub type DetectorFactory = fn(&HyperParams, u64) -> EngineResult<Box<dyn Detector>>;

/// One named algorithm: its tunables and how to instantiate it.
#[derive(Clone)]
pub struct CandidateFamily {
    id: String,
    space: ParameterSpace,
    factory: DetectorFactory,
}

impl fmt::Debug for CandidateFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CandidateFamily")
            .field("id", &self.id)
            .field("space", &self.space)
            .finish_non_exhaustive()
    }
}

impl CandidateFamily {
    /// Creates a family entry.
    #[must_use]
    pub fn new(id: impl Into<String>, space: ParameterSpace, factory: DetectorFactory) -> Self {
        Self {
            id: id.into(),
            space,
            factory,
        }
    }

    /// Family identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tunable domains.
    #[must_use]
    pub const fn space(&self) -> &ParameterSpace {
        &self.space
    }
}

/// What to try: a family and a full hyperparameter assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateConfiguration {
    /// Family identifier.
    pub family: String,
    /// Parameter values in declaration order.
    pub params: HyperParams,
}

impl fmt::Display for CandidateConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.family)?;
        for (idx, (name, value)) in self.params.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        f.write_str(")")
    }
}

/// Registry of candidate families keyed by id, in registration order.
#[derive(Debug, Clone, Default)]
pub struct CandidateSpace {
    families: IndexMap<String, CandidateFamily>,
}

impl CandidateSpace {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a family.
    pub fn register(&mut self, family: CandidateFamily) {
        self.families.insert(family.id.clone(), family);
    }

    /// The nine built-in families.
    pub fn default_space() -> EngineResult<Self> {
        let mut space = Self::new();
        for family in builtin_families()? {
            space.register(family);
        }
        Ok(space)
    }

    /// Keeps only the named families, preserving registration order.
    pub fn restricted(&self, names: &[String]) -> EngineResult<Self> {
        if let Some(unknown) = names.iter().find(|name| !self.families.contains_key(*name)) {
            return Err(EngineError::Configuration(format!(
                "unknown candidate family `{unknown}`"
            )));
        }
        let families = self
            .families
            .iter()
            .filter(|(id, _)| names.contains(*id))
            .map(|(id, family)| (id.clone(), family.clone()))
            .collect();
        Ok(Self { families })
    }

    /// Family by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&CandidateFamily> {
        self.families.get(id)
    }

    /// Families in registration order.
    pub fn families(&self) -> impl Iterator<Item = &CandidateFamily> {
        self.families.values()
    }

    /// Number of families.
    #[must_use]
    pub fn len(&self) -> usize {
        self.families.len()
    }

    /// True when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }

    /// Validates `configuration` and builds the unfitted detector it describes.
    pub fn instantiate(
        &self,
        configuration: &CandidateConfiguration,
        seed: u64,
    ) -> EngineResult<Box<dyn Detector>> {
        let family = self.get(&configuration.family).ok_or_else(|| {
            EngineError::Configuration(format!(
                "unknown candidate family `{}`",
                configuration.family
            ))
        })?;
        family.space.validate(&configuration.params)?;
        (family.factory)(&configuration.params, seed)
    }
}

fn contamination(params: &HyperParams) -> EngineResult<Contamination> {
    Contamination::new(params.float("contamination")?)
}

fn with_contamination(space: ParameterSpace) -> EngineResult<ParameterSpace> {
    space.with("contamination", ParameterDomain::continuous(0.01, 0.2))
}

fn build_iforest(params: &HyperParams, seed: u64) -> EngineResult<Box<dyn Detector>> {
    Ok(Box::new(IsolationForest::new(
        params.count("n_estimators")?,
        params.count("max_samples")?,
        contamination(params)?,
        seed,
    )))
}

fn build_lof(params: &HyperParams, _seed: u64) -> EngineResult<Box<dyn Detector>> {
    Ok(Box::new(Lof::new(
        params.count("n_neighbors")?,
        contamination(params)?,
    )))
}

fn build_knn(params: &HyperParams, _seed: u64) -> EngineResult<Box<dyn Detector>> {
    Ok(Box::new(Knn::new(
        params.count("n_neighbors")?,
        params.choice("method")?.parse()?,
        contamination(params)?,
    )))
}

fn build_hbos(params: &HyperParams, _seed: u64) -> EngineResult<Box<dyn Detector>> {
    Ok(Box::new(Hbos::new(
        params.count("n_bins")?,
        params.float("alpha")?,
        contamination(params)?,
    )))
}

fn build_pca(params: &HyperParams, _seed: u64) -> EngineResult<Box<dyn Detector>> {
    Ok(Box::new(Pca::new(
        params.count("n_components")?,
        contamination(params)?,
    )))
}

fn build_covariance(params: &HyperParams, _seed: u64) -> EngineResult<Box<dyn Detector>> {
    Ok(Box::new(RobustCovariance::new(
        params.float("support_fraction")?,
        contamination(params)?,
    )))
}

fn build_ocsvm(params: &HyperParams, seed: u64) -> EngineResult<Box<dyn Detector>> {
    Ok(Box::new(OneClassSvm::new(
        params.float("nu")?,
        params.float("gamma")?,
        params.count("max_samples")?,
        contamination(params)?,
        seed,
    )))
}

fn build_cblof(params: &HyperParams, seed: u64) -> EngineResult<Box<dyn Detector>> {
    let use_weights = match params.choice("use_weights")? {
        "true" => true,
        "false" => false,
        other => {
            return Err(EngineError::Configuration(format!(
                "use_weights must be `true` or `false`, got `{other}`"
            )))
        }
    };
    Ok(Box::new(Cblof::new(
        params.count("n_clusters")?,
        params.float("alpha")?,
        params.float("beta")?,
        use_weights,
        contamination(params)?,
        seed,
    )))
}

fn build_sod(params: &HyperParams, _seed: u64) -> EngineResult<Box<dyn Detector>> {
    Ok(Box::new(Sod::new(
        params.count("n_neighbors")?,
        params.count("ref_set")?,
        params.float("alpha")?,
        contamination(params)?,
    )))
}

fn builtin_families() -> EngineResult<Vec<CandidateFamily>> {
    Ok(vec![
        CandidateFamily::new(
            "iforest",
            with_contamination(
                ParameterSpace::new()
                    .with("n_estimators", ParameterDomain::discrete(25, 150))?
                    .with("max_samples", ParameterDomain::discrete(16, 256))?,
            )?,
            build_iforest,
        ),
        CandidateFamily::new(
            "lof",
            with_contamination(
                ParameterSpace::new().with("n_neighbors", ParameterDomain::discrete(5, 40))?,
            )?,
            build_lof,
        ),
        CandidateFamily::new(
            "knn",
            with_contamination(
                ParameterSpace::new()
                    .with("n_neighbors", ParameterDomain::discrete(2, 30))?
                    .with(
                        "method",
                        ParameterDomain::categorical(&["largest", "mean", "median"]),
                    )?,
            )?,
            build_knn,
        ),
        CandidateFamily::new(
            "hbos",
            with_contamination(
                ParameterSpace::new()
                    .with("n_bins", ParameterDomain::discrete(5, 50))?
                    .with("alpha", ParameterDomain::continuous(0.01, 0.5))?,
            )?,
            build_hbos,
        ),
        CandidateFamily::new(
            "pca",
            with_contamination(
                ParameterSpace::new().with("n_components", ParameterDomain::discrete(1, 8))?,
            )?,
            build_pca,
        ),
        CandidateFamily::new(
            "robustcovariance",
            with_contamination(
                ParameterSpace::new()
                    .with("support_fraction", ParameterDomain::continuous(0.5, 0.95))?,
            )?,
            build_covariance,
        ),
        CandidateFamily::new(
            "ocsvm",
            with_contamination(
                ParameterSpace::new()
                    .with("nu", ParameterDomain::continuous(0.05, 0.5))?
                    .with("gamma", ParameterDomain::continuous(0.05, 2.0))?
                    .with("max_samples", ParameterDomain::discrete(64, 512))?,
            )?,
            build_ocsvm,
        ),
        CandidateFamily::new(
            "cblof",
            with_contamination(
                ParameterSpace::new()
                    .with("n_clusters", ParameterDomain::discrete(2, 12))?
                    .with("alpha", ParameterDomain::continuous(0.75, 0.95))?
                    .with("beta", ParameterDomain::continuous(2.0, 10.0))?
                    .with("use_weights", ParameterDomain::categorical(&["false", "true"]))?,
            )?,
            build_cblof,
        ),
        CandidateFamily::new(
            "sod",
            with_contamination(
                ParameterSpace::new()
                    .with("n_neighbors", ParameterDomain::discrete(10, 40))?
                    .with("ref_set", ParameterDomain::discrete(3, 9))?
                    .with("alpha", ParameterDomain::continuous(0.5, 0.95))?,
            )?,
            build_sod,
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::fixtures::clustered_with_outliers;
    use rand::{rngs::SmallRng, SeedableRng};

    #[test]
    fn default_space_lists_nine_families() {
        let space = CandidateSpace::default_space().unwrap();
        let ids: Vec<&str> = space.families().map(CandidateFamily::id).collect();
        assert_eq!(
            ids,
            [
                "iforest",
                "lof",
                "knn",
                "hbos",
                "pca",
                "robustcovariance",
                "ocsvm",
                "cblof",
                "sod"
            ]
        );
        assert!(space
            .families()
            .all(|family| family.space().get("contamination").is_some()));
    }

    #[test]
    fn every_family_instantiates_and_fits() {
        let space = CandidateSpace::default_space().unwrap();
        let data = clustered_with_outliers();
        let mut rng = SmallRng::seed_from_u64(5);
        for family in space.families() {
            let configuration = CandidateConfiguration {
                family: family.id().to_string(),
                params: family.space().sample(&mut rng),
            };
            let mut model = space.instantiate(&configuration, 9).unwrap();
            assert_eq!(model.family(), family.id());
            model.fit(&data).unwrap();
            assert_eq!(model.predict(&data).unwrap().len(), data.n_rows());
        }
    }

    #[test]
    fn restriction_rejects_unknown_names() {
        let space = CandidateSpace::default_space().unwrap();
        let only = space.restricted(&["knn".to_string()]).unwrap();
        assert_eq!(only.len(), 1);
        assert!(space.restricted(&["svm".to_string()]).is_err());
    }

    #[test]
    fn instantiate_validates_params() {
        let space = CandidateSpace::default_space().unwrap();
        let mut params = HyperParams::new();
        params.insert("n_neighbors".into(), ParameterValue::Int(500));
        params.insert("contamination".into(), ParameterValue::Float(0.1));
        let configuration = CandidateConfiguration {
            family: "lof".into(),
            params,
        };
        assert!(matches!(
            space.instantiate(&configuration, 0).unwrap_err(),
            EngineError::Configuration(_)
        ));
    }

    #[test]
    fn configuration_renders_family_and_params() {
        let mut params = HyperParams::new();
        params.insert("n_neighbors".into(), ParameterValue::Int(7));
        params.insert("method".into(), ParameterValue::Categorical("mean".into()));
        let configuration = CandidateConfiguration {
            family: "knn".into(),
            params,
        };
        assert_eq!(configuration.to_string(), "knn(n_neighbors=7, method='mean')");
    }
}
