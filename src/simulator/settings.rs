use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::SimulationError;
use crate::simulator::model::NegativeStatePolicy;
use crate::simulator::sampler::RootFinding;

/// Relative tolerance below which two breakpoints are considered the same time
pub(crate) const TIME_EPS: f64 = 1e-9;

/// Upper bound on the number of regular output times of one grid
pub const MAX_OUTPUT_TIMES: usize = 1_000_000;

/// Step-size strategy of the integrator
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum StepControl {
    /// Classical fourth-order Runge-Kutta with a constant step
    Fixed { step_size: f64 },
    /// Dormand-Prince 5(4) with embedded error estimation
    Adaptive(AdaptiveSettings),
}

impl Default for StepControl {
    fn default() -> Self {
        StepControl::Fixed { step_size: 0.1 }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct AdaptiveSettings {
    pub rtol: f64,
    pub atol: f64,
    pub initial_step: f64,
    pub min_step: f64,
    pub max_step: f64,
    /// Consecutive accepted steps after which the step size is doubled
    pub growth_after: usize,
}

impl Default for AdaptiveSettings {
    fn default() -> Self {
        AdaptiveSettings {
            rtol: 1e-6,
            atol: 1e-8,
            initial_step: 0.01,
            min_step: 1e-10,
            max_step: 10.0,
            growth_after: 4,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct IntegratorSettings {
    pub step_control: StepControl,
    /// Upper bound on accepted plus rejected steps for one subject
    pub max_steps: usize,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        IntegratorSettings {
            step_control: StepControl::default(),
            max_steps: 10_000_000,
        }
    }
}

impl IntegratorSettings {
    pub fn fixed(step_size: f64) -> Self {
        IntegratorSettings {
            step_control: StepControl::Fixed { step_size },
            ..Default::default()
        }
    }

    pub fn adaptive(settings: AdaptiveSettings) -> Self {
        IntegratorSettings {
            step_control: StepControl::Adaptive(settings),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.max_steps == 0 {
            return Err(SimulationError::invalid_settings("max_steps must be positive"));
        }
        match self.step_control {
            StepControl::Fixed { step_size } => {
                if !(step_size.is_finite() && step_size > 0.0) {
                    return Err(SimulationError::invalid_settings(format!(
                        "step_size must be positive, got {step_size}"
                    )));
                }
            }
            StepControl::Adaptive(a) => {
                let positive = |v: f64| v.is_finite() && v > 0.0;
                if !(positive(a.rtol) && positive(a.atol)) {
                    return Err(SimulationError::invalid_settings(
                        "rtol and atol must be positive",
                    ));
                }
                if !(positive(a.min_step) && positive(a.max_step) && a.min_step <= a.max_step) {
                    return Err(SimulationError::invalid_settings(format!(
                        "step limits must satisfy 0 < min_step <= max_step, got [{}, {}]",
                        a.min_step, a.max_step
                    )));
                }
                if !(positive(a.initial_step)) {
                    return Err(SimulationError::invalid_settings(
                        "initial_step must be positive",
                    ));
                }
                if a.growth_after == 0 {
                    return Err(SimulationError::invalid_settings(
                        "growth_after must be at least 1",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Requested output times and the simulation horizon
///
/// Samples are taken at `start + k * delta` up to `end`, plus `extra` times. `end` is the
/// horizon: it is always an output time and subjects without an event are censored there.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OutputGrid {
    pub start: f64,
    pub end: f64,
    pub delta: f64,
    #[serde(default)]
    pub extra: Vec<f64>,
}

impl Default for OutputGrid {
    fn default() -> Self {
        OutputGrid {
            start: 0.0,
            end: 24.0,
            delta: 1.0,
            extra: Vec::new(),
        }
    }
}

impl OutputGrid {
    pub fn new(start: f64, end: f64, delta: f64) -> Self {
        OutputGrid {
            start,
            end,
            delta,
            extra: Vec::new(),
        }
    }

    pub fn with_extra(mut self, times: &[f64]) -> Self {
        self.extra.extend_from_slice(times);
        self
    }

    pub fn horizon(&self) -> f64 {
        self.end
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        if !(self.start.is_finite() && self.end.is_finite()) || self.end < self.start {
            return Err(SimulationError::invalid_settings(format!(
                "output grid must satisfy start <= end, got [{}, {}]",
                self.start, self.end
            )));
        }
        if !(self.delta.is_finite() && self.delta > 0.0) {
            return Err(SimulationError::invalid_settings(format!(
                "output spacing must be positive, got {}",
                self.delta
            )));
        }
        let count = (self.end - self.start) / self.delta;
        if count > MAX_OUTPUT_TIMES as f64 {
            return Err(SimulationError::invalid_settings(format!(
                "output grid would hold {count:.0} times, at most {MAX_OUTPUT_TIMES} are allowed"
            )));
        }
        if let Some(t) = self.extra.iter().find(|t| !t.is_finite()) {
            return Err(SimulationError::invalid_settings(format!(
                "extra output time {t} is not finite"
            )));
        }
        Ok(())
    }

    /// Sorted, deduplicated output times within `[start, end]`
    pub fn times(&self) -> Vec<f64> {
        let span = self.end - self.start;
        let n = (span / self.delta * (1.0 + TIME_EPS)).floor() as usize;
        let mut times: Vec<f64> = (0..=n)
            .map(|k| self.start + k as f64 * self.delta)
            .filter(|t| *t <= self.end)
            .collect();
        times.push(self.end);
        times.extend(
            self.extra
                .iter()
                .copied()
                .filter(|t| *t >= self.start && *t <= self.end),
        );
        merge_times(times, &[self.start, self.end])
    }
}

/// Sort and merge times closer than [TIME_EPS] (relative)
///
/// Times within tolerance of one of the sorted `anchors` take the anchor's exact value;
/// any other cluster keeps its earliest time.
pub(crate) fn merge_times(mut times: Vec<f64>, anchors: &[f64]) -> Vec<f64> {
    for t in times.iter_mut() {
        if let Some(anchor) = nearest_anchor(anchors, *t) {
            *t = anchor;
        }
    }
    times.sort_by(|a, b| a.total_cmp(b));
    times.dedup_by(|later, earlier| same_time(*earlier, *later));
    times
}

pub(crate) fn same_time(a: f64, b: f64) -> bool {
    (a - b).abs() <= TIME_EPS * a.abs().max(b.abs()).max(1.0)
}

fn nearest_anchor(anchors: &[f64], t: f64) -> Option<f64> {
    let i = anchors.partition_point(|a| *a < t);
    [i.checked_sub(1), Some(i)]
        .into_iter()
        .flatten()
        .filter_map(|j| anchors.get(j).copied())
        .filter(|a| same_time(*a, t))
        .min_by(|a, b| (a - t).abs().total_cmp(&(b - t).abs()))
}

/// Everything that configures a simulation apart from the model itself
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct SimulationSettings {
    pub integrator: IntegratorSettings,
    pub root_finding: RootFinding,
    pub grid: OutputGrid,
    pub negative_states: NegativeStatePolicy,
}

impl SimulationSettings {
    pub fn new(grid: OutputGrid) -> Self {
        SimulationSettings {
            grid,
            ..Default::default()
        }
    }

    pub fn with_integrator(mut self, integrator: IntegratorSettings) -> Self {
        self.integrator = integrator;
        self
    }

    pub fn with_root_finding(mut self, root_finding: RootFinding) -> Self {
        self.root_finding = root_finding;
        self
    }

    pub fn with_negative_states(mut self, policy: NegativeStatePolicy) -> Self {
        self.negative_states = policy;
        self
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        self.integrator.validate()?;
        self.grid.validate()?;
        self.root_finding.validate()?;
        if let NegativeStatePolicy::Strict { tolerance } = self.negative_states {
            if !(tolerance.is_finite() && tolerance >= 0.0) {
                return Err(SimulationError::invalid_settings(format!(
                    "negative state tolerance must be non-negative, got {tolerance}"
                )));
            }
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, SimulationError> {
        let settings: SimulationSettings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SimulationError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_times_include_the_horizon() {
        let grid = OutputGrid::new(0.0, 1.0, 0.3);
        assert_eq!(grid.times().len(), 5);
        assert_eq!(*grid.times().last().unwrap(), 1.0);

        let grid = OutputGrid::new(0.0, 180.0, 0.1);
        let times = grid.times();
        assert_eq!(times.len(), 1801);
        assert_eq!(times[0], 0.0);
        assert_eq!(*times.last().unwrap(), 180.0);
    }

    #[test]
    fn grid_ends_exactly_on_the_horizon() {
        // 3 * 0.3 lands one ulp below 0.9
        assert!(3.0 * 0.3 < 0.9);
        let times = OutputGrid::new(0.0, 0.9, 0.3).times();
        assert_eq!(times.len(), 4);
        assert_eq!(*times.last().unwrap(), 0.9);

        let times = OutputGrid::new(0.1, 0.7, 0.2).times();
        assert_eq!(times[0], 0.1);
        assert_eq!(*times.last().unwrap(), 0.7);
        assert!(times.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn anchors_win_over_nearby_times() {
        let merged = merge_times(vec![2.0 - 1e-10, 1.0, 0.5 + 1e-12, 0.5], &[0.5, 2.0]);
        assert_eq!(merged, vec![0.5, 1.0, 2.0]);

        let merged = merge_times(vec![1.0 + 1e-12, 1.0 - 1e-12], &[]);
        assert_eq!(merged, vec![1.0 - 1e-12]);
    }

    #[test]
    fn oversized_grids_are_rejected() {
        let grid = OutputGrid::new(0.0, 1e6, 1e-3);
        assert!(matches!(
            grid.validate(),
            Err(SimulationError::Configuration(
                crate::error::ConfigurationError::InvalidSettings { .. }
            ))
        ));
        assert!(OutputGrid::new(0.0, 1e5, 0.1).validate().is_ok());
    }

    #[test]
    fn extra_times_are_merged_and_clipped() {
        let grid = OutputGrid::new(0.0, 2.0, 1.0).with_extra(&[0.5, 1.0 + 1e-12, 5.0, -1.0]);
        assert_eq!(grid.times(), vec![0.0, 0.5, 1.0, 2.0]);
    }

    #[test]
    fn settings_load_from_json_with_defaults() {
        let json = r#"{
            "integrator": {"step_control": {"mode": "adaptive", "rtol": 1e-8}},
            "grid": {"start": 0.0, "end": 180.0, "delta": 0.1},
            "negative_states": {"policy": "strict", "tolerance": 1e-9}
        }"#;
        let settings = SimulationSettings::from_json_str(json).unwrap();
        match settings.integrator.step_control {
            StepControl::Adaptive(a) => {
                assert_eq!(a.rtol, 1e-8);
                assert_eq!(a.growth_after, 4);
            }
            other => panic!("unexpected step control {other:?}"),
        }
        assert_eq!(settings.integrator.max_steps, 10_000_000);
        assert_eq!(settings.root_finding, RootFinding::default());
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let bad_step = SimulationSettings::default().with_integrator(IntegratorSettings::fixed(0.0));
        assert!(bad_step.validate().is_err());

        let bad_grid = SimulationSettings::new(OutputGrid::new(10.0, 0.0, 1.0));
        assert!(bad_grid.validate().is_err());

        let bad_limits = IntegratorSettings::adaptive(AdaptiveSettings {
            min_step: 1.0,
            max_step: 0.1,
            ..Default::default()
        });
        assert!(bad_limits.validate().is_err());
    }
}
