use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigurationError;

/// Name of the parameter holding the per-subject covariate multiplier on the baseline hazard
pub const HAZARD_MULTIPLIER: &str = "NU";

/// A named set of model parameters for one subject
///
/// Parameter names follow the usual mrgsolve conventions (`CL`, `VC`, `KA1`, ...).
/// The set is read-only once a subject's simulation starts; see
/// [RtteModel::resolve](crate::simulator::model::RtteModel::resolve) for validation.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct ParameterSet {
    values: BTreeMap<String, f64>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Fetch a parameter that must be present and finite
    pub fn require(&self, name: &str) -> Result<f64, ConfigurationError> {
        let value = self
            .get(name)
            .ok_or_else(|| ConfigurationError::MissingParameter {
                name: name.to_string(),
            })?;
        if !value.is_finite() {
            return Err(ConfigurationError::InvalidParameter {
                name: name.to_string(),
                value,
                reason: "must be finite".to_string(),
            });
        }
        Ok(value)
    }

    /// Fetch a parameter that must be present, finite and `>= 0`
    pub fn require_non_negative(&self, name: &str) -> Result<f64, ConfigurationError> {
        let value = self.require(name)?;
        if value < 0.0 {
            return Err(invalid(name, value, "must be non-negative"));
        }
        Ok(value)
    }

    /// Fetch a parameter that must be present, finite and `> 0`
    pub fn require_positive(&self, name: &str) -> Result<f64, ConfigurationError> {
        let value = self.require(name)?;
        if value <= 0.0 {
            return Err(invalid(name, value, "must be strictly positive"));
        }
        Ok(value)
    }

    /// Return a copy of this set with the covariate multiplier folded in as [HAZARD_MULTIPLIER]
    pub fn with_hazard_multiplier(&self, multiplier: f64) -> Self {
        self.clone().with(HAZARD_MULTIPLIER, multiplier)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Defaults of the one-depot model with an Emax drug effect on the hazard
    ///
    /// `LAMBDA` is expressed per model time unit.
    pub fn rtte_defaults() -> Self {
        ParameterSet::new()
            .with("VC", 2.44)
            .with("KA1", 0.92)
            .with("CL", 1.0)
            .with("LAMBDA", 0.0217)
            .with("EMAX", 0.692)
            .with("EC50", 4.956)
    }

    /// Defaults of the two-depot, two-compartment model with an inhibitory drug effect
    ///
    /// Volumes in deciliters, time in hours, `LAMBDA` and `GAMMA` per year.
    pub fn pk2cmt_defaults() -> Self {
        ParameterSet::new()
            .with("CL", 1.0)
            .with("VC", 20.0)
            .with("Q", 2.0)
            .with("VP", 10.0)
            .with("KA1", 1.0)
            .with("KA2", 1.0)
            .with("VMAX", 0.0)
            .with("KM", 2.0)
            .with("LAMBDA", 2.96)
            .with("IC50", 10.2)
            .with("GAMMA", -0.566)
    }
}

impl<S: Into<String>> FromIterator<(S, f64)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (S, f64)>>(iter: I) -> Self {
        let mut set = ParameterSet::new();
        for (name, value) in iter {
            set.insert(name, value);
        }
        set
    }
}

impl fmt::Display for ParameterSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rendered: Vec<String> = self.iter().map(|(k, v)| format!("{k}={v}")).collect();
        write!(f, "{{{}}}", rendered.join(", "))
    }
}

fn invalid(name: &str, value: f64, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidParameter {
        name: name.to_string(),
        value,
        reason: reason.to_string(),
    }
}
