pub mod builder;
pub mod covariate;
pub mod event;
pub mod parameters;
pub mod schedule;
pub mod structs;
pub use builder::SubjectBuilder;
pub use covariate::*;
pub use event::*;
pub use parameters::*;
pub use schedule::DosingSchedule;
pub use structs::{subjects_from_json, Subject};
