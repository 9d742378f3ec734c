pub mod batch;
pub mod driver;
pub mod integrator;
pub mod model;
pub mod sampler;
pub mod settings;
pub mod trajectory;

use crate::error::SimulationError;

pub type T = f64;
pub type V = nalgebra::DVector<T>;

/// The right-hand side of an ODE system, `dx/dt = f(t, x)`
///
/// Implementations must be pure: the integrator evaluates them several times per step
/// (once per Runge-Kutta stage), possibly at rejected trial points.
/// Params:
/// - t: The time at which the system is evaluated
/// - x: The state vector at time t
/// - rates: Zero-order input rates (active infusions) per state
/// - dx: A mutable reference to the derivative of the state vector at time t
pub trait RightHandSide: Sync {
    fn nstates(&self) -> usize;

    fn derivatives(&self, t: T, x: &V, rates: &V, dx: &mut V) -> Result<(), SimulationError>;

    /// Bring an accepted state back into its valid domain, or fail
    fn enforce_domain(&self, _t: T, _x: &mut V) -> Result<(), SimulationError> {
        Ok(())
    }
}

pub use batch::{
    subject_draw, BatchOptions, BatchReport, BatchSummary, CancellationToken, SubjectResult,
};
pub use driver::Simulator;
pub use integrator::{IntegrationStats, Integrator};
pub use model::{
    BaselineHazard, BoundModel, CompartmentLayout, DrugEffect, NegativeStatePolicy,
    ResolvedParameters, RtteModel, HOURS_PER_YEAR,
};
pub use sampler::{
    CumulativeHazardCurve, EventTimeSampler, HazardPoint, RootFinding, SampledTime,
};
pub use settings::{
    AdaptiveSettings, IntegratorSettings, OutputGrid, SimulationSettings, StepControl,
    MAX_OUTPUT_TIMES,
};
pub use trajectory::{EventOutcome, SubjectOutcome, TrajectoryRecord, TrajectorySample};
