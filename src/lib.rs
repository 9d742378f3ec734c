//! Simulation of pharmacokinetics coupled to a repeated time-to-event hazard
//!
//! A compartmental PK model drives a hazard that is integrated alongside the drug amounts
//! as a cumulative-hazard compartment. Event times are sampled by inverting the survival
//! function `S(t) = exp(-H(t))` against a uniform draw.
//!
//! ```
//! use rttesim::prelude::*;
//!
//! let simulator = Simulator::new(
//!     RtteModel::rtte_emax(),
//!     SimulationSettings::new(OutputGrid::new(0.0, 180.0, 0.1)),
//! )?;
//! let subject = Subject::builder("1")
//!     .parameters(ParameterSet::rtte_defaults())
//!     .category("ECOG", 1, &[1, 2])
//!     .covariate("cAGE", -0.4)
//!     .bolus(0.0, 100.0, Compartment::Depot(1))
//!     .build();
//!
//! let outcome = simulator.simulate_subject(&subject, 0.4)?;
//! assert!(outcome.event.time <= 180.0);
//! # Ok::<(), rttesim::SimulationError>(())
//! ```

pub mod data;
pub mod error;
pub mod simulator;

pub use crate::data::*;
pub use crate::simulator::{
    BatchOptions, BatchReport, BatchSummary, CancellationToken, EventOutcome, OutputGrid,
    RtteModel, SimulationSettings, Simulator, SubjectOutcome, TrajectoryRecord,
};
pub use error::{ConfigurationError, SimulationError};

pub mod prelude {
    pub mod data {
        pub use crate::data::{
            subjects_from_json, Compartment, CovariateModel, CovariateRecord, DoseKind,
            DosingEvent, DosingSchedule, ParameterSet, Subject, SubjectBuilder,
        };
    }
    pub mod simulator {
        pub use crate::simulator::{
            AdaptiveSettings, BaselineHazard, DrugEffect, EventTimeSampler, HazardPoint,
            IntegrationStats, Integrator, IntegratorSettings, NegativeStatePolicy, RightHandSide,
            RootFinding, StepControl, TrajectorySample, HOURS_PER_YEAR,
        };
    }

    pub use crate::data::*;
    pub use crate::error::{ConfigurationError, SimulationError};
    pub use crate::simulator::{
        BatchOptions, BatchReport, BatchSummary, CancellationToken, EventOutcome, IntegratorSettings,
        NegativeStatePolicy, OutputGrid, RootFinding, RtteModel, SimulationSettings, Simulator,
        StepControl, SubjectOutcome, TrajectoryRecord,
    };
}
