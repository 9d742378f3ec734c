use serde::{Deserialize, Serialize};
use std::fmt;

/// A compartment of the model, independent of its position in the state vector
///
/// The mapping to a state index depends on the model layout, see
/// [CompartmentLayout](crate::simulator::model::CompartmentLayout).
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Compartment {
    /// Extravascular absorption depot, numbered from 1
    Depot(usize),
    Central,
    Peripheral,
    CumulativeHazard,
}

impl fmt::Display for Compartment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Compartment::Depot(n) => write!(f, "EV{n}"),
            Compartment::Central => write!(f, "CENT"),
            Compartment::Peripheral => write!(f, "PERIPH"),
            Compartment::CumulativeHazard => write!(f, "CHAZARD"),
        }
    }
}

/// The perturbation a dosing event applies
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DoseKind {
    /// Instantaneous input of `amount` mass units
    Bolus { amount: f64 },
    /// Start a zero-order input of `rate` mass units per time unit
    InfusionStart { rate: f64 },
    /// Remove `rate` from the active input of the compartment
    InfusionStop { rate: f64 },
}

/// A discrete perturbation of the state at a given time
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DosingEvent {
    time: f64,
    target: Compartment,
    kind: DoseKind,
}

impl DosingEvent {
    pub fn new(time: f64, target: Compartment, kind: DoseKind) -> Self {
        DosingEvent { time, target, kind }
    }

    pub fn bolus(time: f64, target: Compartment, amount: f64) -> Self {
        Self::new(time, target, DoseKind::Bolus { amount })
    }

    pub fn infusion_start(time: f64, target: Compartment, rate: f64) -> Self {
        Self::new(time, target, DoseKind::InfusionStart { rate })
    }

    pub fn infusion_stop(time: f64, target: Compartment, rate: f64) -> Self {
        Self::new(time, target, DoseKind::InfusionStop { rate })
    }

    /// Time at which the perturbation is applied
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Compartment receiving the perturbation
    pub fn target(&self) -> Compartment {
        self.target
    }

    pub fn kind(&self) -> DoseKind {
        self.kind
    }

    /// The amount (bolus) or rate (infusions) carried by the event
    pub fn magnitude(&self) -> f64 {
        match self.kind {
            DoseKind::Bolus { amount } => amount,
            DoseKind::InfusionStart { rate } | DoseKind::InfusionStop { rate } => rate,
        }
    }

    pub(crate) fn at(&self, time: f64) -> Self {
        DosingEvent {
            time,
            ..self.clone()
        }
    }

    pub(crate) fn shifted(&self, dt: f64) -> Self {
        DosingEvent {
            time: self.time + dt,
            ..self.clone()
        }
    }
}

impl fmt::Display for DosingEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            DoseKind::Bolus { amount } => write!(
                f,
                "Bolus at t={:.2} of {:.2} into {}",
                self.time, amount, self.target
            ),
            DoseKind::InfusionStart { rate } => write!(
                f,
                "Infusion start at t={:.2} of {:.2}/time into {}",
                self.time, rate, self.target
            ),
            DoseKind::InfusionStop { rate } => write!(
                f,
                "Infusion stop at t={:.2} of {:.2}/time into {}",
                self.time, rate, self.target
            ),
        }
    }
}
