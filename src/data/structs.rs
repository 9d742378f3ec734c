use serde::{Deserialize, Serialize};

use crate::data::{
    builder::SubjectBuilder, covariate::CovariateRecord, event::Compartment,
    parameters::ParameterSet, schedule::DosingSchedule,
};

/// Everything the engine needs to know about one simulated subject
///
/// Subjects are independent of each other: a population is simulated by handing each
/// [Subject] to the driver, possibly on different threads.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Subject {
    id: String,
    parameters: ParameterSet,
    #[serde(default)]
    covariates: CovariateRecord,
    #[serde(default)]
    schedule: DosingSchedule,
    #[serde(default)]
    initial_amounts: Vec<(Compartment, f64)>,
    #[serde(default)]
    draw: Option<f64>,
}

impl Subject {
    pub(crate) fn new(
        id: String,
        parameters: ParameterSet,
        covariates: CovariateRecord,
        schedule: DosingSchedule,
        initial_amounts: Vec<(Compartment, f64)>,
        draw: Option<f64>,
    ) -> Self {
        Subject {
            id,
            parameters,
            covariates,
            schedule,
            initial_amounts,
            draw,
        }
    }

    /// Start building a subject with the given identifier
    pub fn builder(id: impl Into<String>) -> SubjectBuilder {
        SubjectBuilder::new(id.into())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    pub fn covariates(&self) -> &CovariateRecord {
        &self.covariates
    }

    pub fn schedule(&self) -> &DosingSchedule {
        &self.schedule
    }

    /// Amounts present at the start of the simulation, in addition to scheduled doses
    pub fn initial_amounts(&self) -> &[(Compartment, f64)] {
        &self.initial_amounts
    }

    /// Uniform draw fixed by the caller, if any
    ///
    /// When absent the batch driver derives a reproducible draw from its seed.
    pub fn draw(&self) -> Option<f64> {
        self.draw
    }

    /// Replace the parameter set, keeping everything else
    pub fn with_parameters(&self, parameters: ParameterSet) -> Self {
        Subject {
            parameters,
            ..self.clone()
        }
    }
}

/// Read a population of subjects from a JSON array
pub fn subjects_from_json(json: &str) -> Result<Vec<Subject>, crate::SimulationError> {
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_deserialize_with_defaults() {
        let json = r#"[{"id": "1", "parameters": {"CL": 1.0, "VC": 20.0}}]"#;
        let subjects = subjects_from_json(json).unwrap();
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0].id(), "1");
        assert!(subjects[0].schedule().is_empty());
        assert!(subjects[0].covariates().is_empty());
        assert_eq!(subjects[0].draw(), None);
    }
}
