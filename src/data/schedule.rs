use serde::{Deserialize, Serialize};

use crate::data::event::{Compartment, DosingEvent};

/// Dosing events of one subject, kept in non-decreasing time order
///
/// Events sharing a time keep their insertion order, which is also the order in which
/// they are applied to the state.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(from = "Vec<DosingEvent>", into = "Vec<DosingEvent>")]
pub struct DosingSchedule {
    events: Vec<DosingEvent>,
}

impl DosingSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an event after every event scheduled at the same time or earlier
    pub fn push(&mut self, event: DosingEvent) {
        let position = self
            .events
            .partition_point(|existing| existing.time() <= event.time());
        self.events.insert(position, event);
    }

    pub fn bolus(&mut self, time: f64, target: Compartment, amount: f64) {
        self.push(DosingEvent::bolus(time, target, amount));
    }

    /// Zero-order infusion of `amount` over `duration`, as a start/stop pair
    ///
    /// A non-positive duration degrades to a bolus of the full amount.
    pub fn infusion(&mut self, time: f64, target: Compartment, amount: f64, duration: f64) {
        if duration <= 0.0 {
            self.bolus(time, target, amount);
            return;
        }
        let rate = amount / duration;
        self.push(DosingEvent::infusion_start(time, target, rate));
        self.push(DosingEvent::infusion_stop(time + duration, target, rate));
    }

    /// Events in application order
    pub fn events(&self) -> &[DosingEvent] {
        &self.events
    }

    /// Distinct event times in increasing order
    pub fn times(&self) -> Vec<f64> {
        let mut times: Vec<f64> = self.events.iter().map(|e| e.time()).collect();
        times.dedup();
        times
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total bolus amount and infused amount (rate times scheduled duration) per target
    ///
    /// Infusions still running when the schedule ends are not counted.
    pub fn total_amount(&self, target: Compartment) -> f64 {
        use crate::data::event::DoseKind;
        let mut total = 0.0;
        let mut running: Vec<(f64, f64)> = Vec::new();
        for event in self.events.iter().filter(|e| e.target() == target) {
            match event.kind() {
                DoseKind::Bolus { amount } => total += amount,
                DoseKind::InfusionStart { rate } => running.push((event.time(), rate)),
                DoseKind::InfusionStop { rate } => {
                    if let Some(index) = running.iter().position(|(_, r)| *r == rate) {
                        let (start, _) = running.remove(index);
                        total += rate * (event.time() - start);
                    }
                }
            }
        }
        total
    }
}

impl From<Vec<DosingEvent>> for DosingSchedule {
    fn from(events: Vec<DosingEvent>) -> Self {
        let mut schedule = DosingSchedule::new();
        for event in events {
            schedule.push(event);
        }
        schedule
    }
}

impl From<DosingSchedule> for Vec<DosingEvent> {
    fn from(schedule: DosingSchedule) -> Self {
        schedule.events
    }
}
