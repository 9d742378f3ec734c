//! Event times by inversion of the cumulative hazard
//!
//! With survival `S(t) = exp(-H(t))`, solving `S(t*) = U` for a uniform draw `U` is the
//! same as solving `H(t*) = -ln(U)`. The cumulative hazard is available at the
//! breakpoints of the simulation; the root is bracketed between two of them and then
//! located either by linear interpolation or by Brent's method on the model itself.

use argmin::{
    core::{CostFunction, Error, Executor},
    solver::brent::BrentRoot,
};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, SimulationError};

/// How the event time is located inside the bracketing segment
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum RootFinding {
    /// Linear interpolation between the segment endpoints
    Linear,
    /// Brent's method on the re-integrated cumulative hazard
    Brent { tolerance: f64, max_iters: u64 },
}

impl Default for RootFinding {
    fn default() -> Self {
        RootFinding::Brent {
            tolerance: 1e-10,
            max_iters: 100,
        }
    }
}

impl RootFinding {
    pub fn validate(&self) -> Result<(), SimulationError> {
        if let RootFinding::Brent {
            tolerance,
            max_iters,
        } = self
        {
            if !(tolerance.is_finite() && *tolerance > 0.0) || *max_iters == 0 {
                return Err(SimulationError::invalid_settings(format!(
                    "Brent root finding needs a positive tolerance and iteration limit, got {tolerance} and {max_iters}"
                )));
            }
        }
        Ok(())
    }
}

/// Cumulative hazard at a breakpoint
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct HazardPoint {
    pub time: f64,
    pub cumulative_hazard: f64,
}

/// Cumulative hazard between breakpoints
///
/// `segment` is the index of the breakpoint the segment starts at; `t` lies between that
/// breakpoint and the next one.
pub trait CumulativeHazardCurve {
    fn cumulative_hazard(&self, segment: usize, t: f64) -> Result<f64, SimulationError>;
}

/// Result of the inversion, before it is attributed to a cause
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampledTime {
    Event(f64),
    /// No event before the horizon; carries the horizon
    Censored(f64),
}

pub struct EventTimeSampler {
    method: RootFinding,
}

impl EventTimeSampler {
    pub fn new(method: RootFinding) -> Self {
        EventTimeSampler { method }
    }

    /// Find the event time for the draw `u` on a non-decreasing cumulative-hazard trace
    ///
    /// `curve` refines the root inside a segment when Brent's method is configured;
    /// without it linear interpolation is used. Ties resolve to the earliest time, and a
    /// target beyond the last point is censored at exactly the last time.
    pub fn sample(
        &self,
        trace: &[HazardPoint],
        u: f64,
        curve: Option<&dyn CumulativeHazardCurve>,
    ) -> Result<SampledTime, SimulationError> {
        if !(0.0..=1.0).contains(&u) {
            return Err(ConfigurationError::InvalidDraw { value: u }.into());
        }
        let (first, last) = match (trace.first(), trace.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => {
                return Err(SimulationError::invalid_settings(
                    "cannot sample an event time from an empty trajectory",
                ))
            }
        };

        if u == 0.0 {
            return Ok(SampledTime::Event(first.time));
        }
        if u == 1.0 {
            return Ok(SampledTime::Censored(last.time));
        }

        let target = -u.ln();
        if target <= first.cumulative_hazard {
            return Ok(SampledTime::Event(first.time));
        }

        for (segment, pair) in trace.windows(2).enumerate() {
            let (a, b) = (pair[0], pair[1]);
            if !(a.cumulative_hazard < target && target <= b.cumulative_hazard) {
                continue;
            }
            if target == b.cumulative_hazard {
                return Ok(SampledTime::Event(b.time));
            }
            let time = self.locate(segment, a, b, target, curve)?;
            return Ok(SampledTime::Event(time));
        }

        Ok(SampledTime::Censored(last.time))
    }

    fn locate(
        &self,
        segment: usize,
        a: HazardPoint,
        b: HazardPoint,
        target: f64,
        curve: Option<&dyn CumulativeHazardCurve>,
    ) -> Result<f64, SimulationError> {
        let linear = interpolate(a, b, target);
        let (tolerance, max_iters, curve) = match (self.method, curve) {
            (
                RootFinding::Brent {
                    tolerance,
                    max_iters,
                },
                Some(curve),
            ) => (tolerance, max_iters, curve),
            _ => return Ok(linear),
        };

        // the refined curve may disagree with the stored endpoints by the integration error
        let f_lo = curve.cumulative_hazard(segment, a.time)? - target;
        if f_lo >= 0.0 {
            return Ok(a.time);
        }
        let f_hi = curve.cumulative_hazard(segment, b.time)? - target;
        if f_hi <= 0.0 {
            return Ok(b.time);
        }

        let problem = SegmentRoot {
            curve,
            segment,
            target,
        };
        let solver = BrentRoot::new(a.time, b.time, tolerance);
        let result = Executor::new(problem, solver)
            .configure(|state| state.max_iters(max_iters))
            .run()?;

        Ok(result
            .state
            .best_param
            .map(|t| t.clamp(a.time, b.time))
            .unwrap_or(linear))
    }
}

fn interpolate(a: HazardPoint, b: HazardPoint, target: f64) -> f64 {
    let fraction = (target - a.cumulative_hazard) / (b.cumulative_hazard - a.cumulative_hazard);
    a.time + fraction * (b.time - a.time)
}

struct SegmentRoot<'a> {
    curve: &'a dyn CumulativeHazardCurve,
    segment: usize,
    target: f64,
}

impl CostFunction for SegmentRoot<'_> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, t: &Self::Param) -> Result<Self::Output, Error> {
        Ok(self.curve.cumulative_hazard(self.segment, *t)? - self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// `H(t) = scale * t^power`
    struct PowerCurve {
        scale: f64,
        power: f64,
    }

    impl PowerCurve {
        fn at(&self, t: f64) -> f64 {
            self.scale * t.powf(self.power)
        }

        fn trace(&self, times: &[f64]) -> Vec<HazardPoint> {
            times
                .iter()
                .map(|&time| HazardPoint {
                    time,
                    cumulative_hazard: self.at(time),
                })
                .collect()
        }
    }

    impl CumulativeHazardCurve for PowerCurve {
        fn cumulative_hazard(&self, _segment: usize, t: f64) -> Result<f64, SimulationError> {
            Ok(self.at(t))
        }
    }

    fn grid(end: f64, n: usize) -> Vec<f64> {
        (0..=n).map(|i| end * i as f64 / n as f64).collect()
    }

    #[test]
    fn constant_hazard_inverts_exactly() {
        let k = 0.02;
        let curve = PowerCurve {
            scale: k,
            power: 1.0,
        };
        let trace = curve.trace(&grid(500.0, 50));

        for method in [RootFinding::Linear, RootFinding::default()] {
            let sampler = EventTimeSampler::new(method);
            for u in [0.9f64, 0.5, 0.3, 0.01] {
                let expected = -u.ln() / k;
                match sampler.sample(&trace, u, Some(&curve)).unwrap() {
                    SampledTime::Event(t) => assert_relative_eq!(t, expected, max_relative = 1e-9),
                    other => panic!("expected an event, got {other:?}"),
                }
            }
        }
    }

    #[test]
    fn brent_refines_curved_segments() {
        let curve = PowerCurve {
            scale: 0.1,
            power: 2.0,
        };
        let trace = curve.trace(&grid(10.0, 10));
        let u: f64 = 0.5;
        let expected = (-u.ln() / 0.1).sqrt();

        let refined = EventTimeSampler::new(RootFinding::default())
            .sample(&trace, u, Some(&curve))
            .unwrap();
        match refined {
            SampledTime::Event(t) => assert_relative_eq!(t, expected, epsilon = 1e-8),
            other => panic!("expected an event, got {other:?}"),
        }

        let linear = EventTimeSampler::new(RootFinding::Linear)
            .sample(&trace, u, Some(&curve))
            .unwrap();
        match linear {
            SampledTime::Event(t) => {
                assert!((t - expected).abs() > 1e-3);
                assert!(t > 2.0 && t < 3.0);
            }
            other => panic!("expected an event, got {other:?}"),
        }
    }

    #[test]
    fn unreached_target_is_censored_at_the_horizon() {
        let curve = PowerCurve {
            scale: 0.001,
            power: 1.0,
        };
        let trace = curve.trace(&grid(100.0, 10));
        // H(100) = 0.1 < -ln(0.5)
        let sampled = EventTimeSampler::new(RootFinding::default())
            .sample(&trace, 0.5, Some(&curve))
            .unwrap();
        assert_eq!(sampled, SampledTime::Censored(100.0));
    }

    #[test]
    fn degenerate_draws() {
        let curve = PowerCurve {
            scale: 1.0,
            power: 1.0,
        };
        let trace = curve.trace(&[2.0, 3.0, 4.0]);
        let sampler = EventTimeSampler::new(RootFinding::Linear);

        assert_eq!(
            sampler.sample(&trace, 0.0, None).unwrap(),
            SampledTime::Event(2.0)
        );
        assert_eq!(
            sampler.sample(&trace, 1.0, None).unwrap(),
            SampledTime::Censored(4.0)
        );
        for bad in [-0.1, 1.5, f64::NAN] {
            assert!(matches!(
                sampler.sample(&trace, bad, None),
                Err(SimulationError::Configuration(
                    ConfigurationError::InvalidDraw { .. }
                ))
            ));
        }
        assert!(sampler.sample(&[], 0.5, None).is_err());
    }

    #[test]
    fn ties_resolve_to_the_earliest_time() {
        let u: f64 = 0.4;
        let target = -u.ln();
        let trace = [
            HazardPoint {
                time: 0.0,
                cumulative_hazard: 0.0,
            },
            HazardPoint {
                time: 1.0,
                cumulative_hazard: target,
            },
            HazardPoint {
                time: 2.0,
                cumulative_hazard: target,
            },
            HazardPoint {
                time: 3.0,
                cumulative_hazard: 2.0 * target,
            },
        ];
        let sampled = EventTimeSampler::new(RootFinding::default())
            .sample(&trace, u, None)
            .unwrap();
        assert_eq!(sampled, SampledTime::Event(1.0));
    }

    #[test]
    fn target_below_initial_hazard_fires_at_start() {
        let trace = [
            HazardPoint {
                time: 5.0,
                cumulative_hazard: 3.0,
            },
            HazardPoint {
                time: 6.0,
                cumulative_hazard: 4.0,
            },
        ];
        let sampled = EventTimeSampler::new(RootFinding::Linear)
            .sample(&trace, 0.5, None)
            .unwrap();
        assert_eq!(sampled, SampledTime::Event(5.0));
    }
}
