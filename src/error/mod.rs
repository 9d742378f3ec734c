use thiserror::Error;

/// Problems with the inputs of a simulation, detected before any integration takes place.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("Missing parameter: {name}")]
    MissingParameter { name: String },
    #[error("Invalid parameter: {name} = {value} ({reason})")]
    InvalidParameter {
        name: String,
        value: f64,
        reason: String,
    },
    #[error("Missing covariate: {name}")]
    MissingCovariate { name: String },
    #[error("Invalid covariate: {name} = {value}")]
    InvalidCovariate { name: String, value: f64 },
    #[error("Invalid dosing event at t = {time}: {reason}")]
    InvalidDose { time: f64, reason: String },
    #[error("Invalid settings: {reason}")]
    InvalidSettings { reason: String },
    #[error("Invalid initial state: {reason}")]
    InvalidInitialState { reason: String },
    #[error("Uniform draw must lie in [0, 1], got {value}")]
    InvalidDraw { value: f64 },
}

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// The evaluator hit a mathematically undefined operation
    #[error("Undefined operation at t = {time}: {reason}")]
    Domain { time: f64, reason: String },

    /// A mass compartment went negative beyond the configured tolerance
    #[error("Invalid state at t = {time}: compartment {compartment} holds {amount}")]
    InvalidState {
        time: f64,
        compartment: String,
        amount: f64,
    },

    /// Step-size control gave up; `time` is the last time reached with a valid state
    #[error("Integration diverged at t = {time} (step size {step:e}): {reason}")]
    IntegrationDiverged { time: f64, step: f64, reason: String },

    #[error("Subject {id} was not simulated: the batch was cancelled")]
    Cancelled { id: String },

    #[error("Root finding failed: {0}")]
    RootFinding(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SimulationError {
    /// Short, stable label used when summarizing failures of a batch
    pub fn kind(&self) -> &'static str {
        match self {
            SimulationError::Configuration(_) => "configuration",
            SimulationError::Domain { .. } => "domain",
            SimulationError::InvalidState { .. } => "invalid_state",
            SimulationError::IntegrationDiverged { .. } => "integration_diverged",
            SimulationError::Cancelled { .. } => "cancelled",
            SimulationError::RootFinding(_) => "root_finding",
            SimulationError::Io(_) | SimulationError::Csv(_) | SimulationError::Json(_) => "io",
        }
    }

    pub(crate) fn invalid_settings(reason: impl Into<String>) -> Self {
        ConfigurationError::InvalidSettings {
            reason: reason.into(),
        }
        .into()
    }
}

/// Recover our own error from the type-erased error returned by `argmin`.
impl From<anyhow::Error> for SimulationError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<SimulationError>() {
            Ok(inner) => inner,
            Err(other) => SimulationError::RootFinding(other.to_string()),
        }
    }
}
