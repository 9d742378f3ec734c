use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::ConfigurationError;

/// Covariate values of a single subject
///
/// Continuous covariates are stored as-is. Categorical covariates are expanded into
/// indicator (dummy) variables against a reference level, so that the hazard model only
/// ever sees numbers. For example ECOG status 2 with levels `[1, 2]` becomes
/// `ECOG1 = 0, ECOG2 = 1`.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(transparent)]
pub struct CovariateRecord {
    values: BTreeMap<String, f64>,
}

impl CovariateRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a continuous covariate
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    /// Add a categorical covariate as one indicator per non-reference level
    ///
    /// Indicators are named `{name}{level}`. A value equal to none of the levels is the
    /// reference category and sets every indicator to zero.
    pub fn with_category(mut self, name: &str, value: i64, levels: &[i64]) -> Self {
        for level in levels {
            let indicator = if *level == value { 1.0 } else { 0.0 };
            self.insert(format!("{name}{level}"), indicator);
        }
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Log-linear covariate model for the baseline hazard
///
/// The multiplier is `exp(Σ beta_i * covariate_i)`, computed once per subject and handed
/// to the evaluator as a single scalar.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct CovariateModel {
    coefficients: BTreeMap<String, f64>,
}

impl CovariateModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn coefficient(mut self, covariate: impl Into<String>, beta: f64) -> Self {
        self.coefficients.insert(covariate.into(), beta);
        self
    }

    /// ECOG and centered-age effects of the single-depot RTTE model
    ///
    /// Roughly a 10% increase in hazard for ECOG 1 and a 25% increase for ECOG > 1
    /// relative to ECOG 0, and 10% per unit of centered age.
    pub fn ecog_age() -> Self {
        CovariateModel::new()
            .coefficient("ECOG1", 0.095)
            .coefficient("ECOG2", 0.223)
            .coefficient("cAGE", 0.095)
    }

    pub fn coefficients(&self) -> impl Iterator<Item = (&str, f64)> {
        self.coefficients.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Linear predictor `Σ beta_i * covariate_i`
    ///
    /// Every covariate with a coefficient must be present in the record. Covariates in the
    /// record without a coefficient are ignored.
    pub fn linear_predictor(&self, record: &CovariateRecord) -> Result<f64, ConfigurationError> {
        let mut eta = 0.0;
        for (name, beta) in self.coefficients() {
            if !beta.is_finite() {
                return Err(ConfigurationError::InvalidParameter {
                    name: format!("beta[{name}]"),
                    value: beta,
                    reason: "must be finite".to_string(),
                });
            }
            let value = record
                .get(name)
                .ok_or_else(|| ConfigurationError::MissingCovariate {
                    name: name.to_string(),
                })?;
            if !value.is_finite() {
                return Err(ConfigurationError::InvalidCovariate {
                    name: name.to_string(),
                    value,
                });
            }
            eta += beta * value;
        }
        Ok(eta)
    }

    /// Hazard multiplier `exp(linear predictor)`
    pub fn multiplier(&self, record: &CovariateRecord) -> Result<f64, ConfigurationError> {
        let nu = self.linear_predictor(record)?.exp();
        if !nu.is_finite() || nu <= 0.0 {
            return Err(ConfigurationError::InvalidParameter {
                name: crate::data::parameters::HAZARD_MULTIPLIER.to_string(),
                value: nu,
                reason: "covariate multiplier overflowed".to_string(),
            });
        }
        Ok(nu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn categorical_covariates_expand_to_indicators() {
        let record = CovariateRecord::new().with_category("ECOG", 2, &[1, 2]);
        assert_eq!(record.get("ECOG1"), Some(0.0));
        assert_eq!(record.get("ECOG2"), Some(1.0));

        let reference = CovariateRecord::new().with_category("ECOG", 0, &[1, 2]);
        assert!(reference.iter().all(|(_, v)| v == 0.0));
    }

    #[test]
    fn multiplier_is_exponentiated_linear_predictor() {
        let model = CovariateModel::ecog_age();
        let record = CovariateRecord::new()
            .with_category("ECOG", 1, &[1, 2])
            .with("cAGE", 0.5);

        let nu = model.multiplier(&record).unwrap();
        assert_relative_eq!(nu, (0.095f64 + 0.095 * 0.5).exp(), max_relative = 1e-12);
    }

    #[test]
    fn empty_model_gives_unit_multiplier() {
        let nu = CovariateModel::new()
            .multiplier(&CovariateRecord::new())
            .unwrap();
        assert_eq!(nu, 1.0);
    }

    #[test]
    fn missing_covariate_is_a_configuration_error() {
        let model = CovariateModel::ecog_age();
        let record = CovariateRecord::new().with("ECOG1", 1.0);
        assert!(matches!(
            model.multiplier(&record),
            Err(ConfigurationError::MissingCovariate { .. })
        ));
    }
}
