use serde::{Deserialize, Serialize};

use crate::error::SimulationError;
use crate::simulator::settings::{same_time, AdaptiveSettings, IntegratorSettings, StepControl};
use crate::simulator::{RightHandSide, T, V};

// Dormand-Prince 5(4) tableau
const C: [f64; 7] = [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0];
const A: [[f64; 6]; 7] = [
    [0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0],
    [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0],
    [
        19372.0 / 6561.0,
        -25360.0 / 2187.0,
        64448.0 / 6561.0,
        -212.0 / 729.0,
        0.0,
        0.0,
    ],
    [
        9017.0 / 3168.0,
        -355.0 / 33.0,
        46732.0 / 5247.0,
        49.0 / 176.0,
        -5103.0 / 18656.0,
        0.0,
    ],
    // the last stage is evaluated at the fifth-order solution
    [
        35.0 / 384.0,
        0.0,
        500.0 / 1113.0,
        125.0 / 192.0,
        -2187.0 / 6784.0,
        11.0 / 84.0,
    ],
];
// fifth-order minus fourth-order weights
const E: [f64; 7] = [
    71.0 / 57600.0,
    0.0,
    -71.0 / 16695.0,
    71.0 / 1920.0,
    -17253.0 / 339200.0,
    22.0 / 525.0,
    -1.0 / 40.0,
];

/// Counters accumulated over the lifetime of an [Integrator]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrationStats {
    pub accepted_steps: u64,
    pub rejected_steps: u64,
    pub rhs_evaluations: u64,
}

impl IntegrationStats {
    pub fn total_steps(&self) -> u64 {
        self.accepted_steps + self.rejected_steps
    }
}

struct Workspace {
    k: Vec<V>,
    y: V,
    err: V,
}

impl Workspace {
    fn new(n: usize) -> Self {
        Workspace {
            k: (0..7).map(|_| V::zeros(n)).collect(),
            y: V::zeros(n),
            err: V::zeros(n),
        }
    }
}

/// Explicit Runge-Kutta integrator that stops exactly at every requested time
///
/// One integrator is meant to serve one subject: it carries the adaptive step size from
/// one interval to the next and enforces the step budget over all intervals.
pub struct Integrator {
    settings: IntegratorSettings,
    stats: IntegrationStats,
    step: Option<f64>,
    workspace: Option<Workspace>,
}

impl Integrator {
    pub fn new(settings: IntegratorSettings) -> Self {
        Integrator {
            settings,
            stats: IntegrationStats::default(),
            step: None,
            workspace: None,
        }
    }

    pub fn settings(&self) -> &IntegratorSettings {
        &self.settings
    }

    pub fn stats(&self) -> IntegrationStats {
        self.stats
    }

    /// Advance `x` in place from `t0` to exactly `t1`
    ///
    /// `rates` are the zero-order inputs, constant over the interval.
    pub fn advance<R: RightHandSide + ?Sized>(
        &mut self,
        system: &R,
        x: &mut V,
        rates: &V,
        t0: T,
        t1: T,
    ) -> Result<(), SimulationError> {
        if t1 < t0 {
            return Err(SimulationError::invalid_settings(format!(
                "cannot integrate backwards from {t0} to {t1}"
            )));
        }
        if t1 == t0 {
            return Ok(());
        }

        let n = system.nstates();
        let mut workspace = match self.workspace.take() {
            Some(ws) if ws.y.len() == n => ws,
            _ => Workspace::new(n),
        };

        let result = match self.settings.step_control {
            StepControl::Fixed { step_size } => {
                self.advance_fixed(system, &mut workspace, x, rates, t0, t1, step_size)
            }
            StepControl::Adaptive(adaptive) => {
                self.advance_adaptive(system, &mut workspace, x, rates, t0, t1, &adaptive)
            }
        };
        self.workspace = Some(workspace);
        result
    }

    /// Integrate from `(t0, x0)` without inputs, returning the state at every output time
    ///
    /// Output times must be non-decreasing and not earlier than `t0`.
    pub fn integrate<R: RightHandSide + ?Sized>(
        &mut self,
        system: &R,
        x0: &V,
        t0: T,
        outputs: &[T],
    ) -> Result<Vec<(T, V)>, SimulationError> {
        let rates = V::zeros(system.nstates());
        let mut x = x0.clone();
        let mut t = t0;
        let mut samples = Vec::with_capacity(outputs.len());
        for &target in outputs {
            if target < t {
                return Err(SimulationError::invalid_settings(format!(
                    "output time {target} precedes {t}"
                )));
            }
            self.advance(system, &mut x, &rates, t, target)?;
            t = target;
            samples.push((t, x.clone()));
        }
        Ok(samples)
    }

    fn count_step(&mut self, t: T, h: f64) -> Result<(), SimulationError> {
        if self.stats.total_steps() >= self.settings.max_steps as u64 {
            return Err(SimulationError::IntegrationDiverged {
                time: t,
                step: h,
                reason: format!("step budget of {} exhausted", self.settings.max_steps),
            });
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn advance_fixed<R: RightHandSide + ?Sized>(
        &mut self,
        system: &R,
        ws: &mut Workspace,
        x: &mut V,
        rates: &V,
        t0: T,
        t1: T,
        step_size: f64,
    ) -> Result<(), SimulationError> {
        let mut t = t0;
        while t < t1 {
            let remaining = t1 - t;
            let last = remaining <= step_size || same_time(t + step_size, t1);
            let h = if last { remaining } else { step_size };
            self.count_step(t, h)?;

            rk4_step(system, ws, t, x, rates, h)?;
            self.stats.rhs_evaluations += 4;
            self.stats.accepted_steps += 1;

            t = if last { t1 } else { t + h };
            system.enforce_domain(t, x)?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn advance_adaptive<R: RightHandSide + ?Sized>(
        &mut self,
        system: &R,
        ws: &mut Workspace,
        x: &mut V,
        rates: &V,
        t0: T,
        t1: T,
        adaptive: &AdaptiveSettings,
    ) -> Result<(), SimulationError> {
        let mut h = self
            .step
            .unwrap_or(adaptive.initial_step)
            .clamp(adaptive.min_step, adaptive.max_step);
        let mut consecutive = 0;
        let mut t = t0;

        while t < t1 {
            let remaining = t1 - t;
            let last = remaining <= h || same_time(t + h, t1);
            let h_try = if last { remaining } else { h };
            self.count_step(t, h_try)?;

            let error = dopri_trial(system, ws, t, x, rates, h_try, adaptive)?;
            self.stats.rhs_evaluations += 7;

            if error <= 1.0 {
                x.copy_from(&ws.y);
                t = if last { t1 } else { t + h_try };
                system.enforce_domain(t, x)?;
                self.stats.accepted_steps += 1;

                consecutive += 1;
                if consecutive >= adaptive.growth_after {
                    h = (h * 2.0).min(adaptive.max_step);
                    consecutive = 0;
                }
            } else {
                self.stats.rejected_steps += 1;
                consecutive = 0;
                let halved = h_try / 2.0;
                if halved < adaptive.min_step {
                    return Err(SimulationError::IntegrationDiverged {
                        time: t,
                        step: halved,
                        reason: format!(
                            "error estimate {error:.3e} exceeds tolerance at the minimum step size"
                        ),
                    });
                }
                h = halved;
            }
        }

        self.step = Some(h);
        Ok(())
    }
}

/// Classical fourth-order Runge-Kutta step, updating `x` in place
fn rk4_step<R: RightHandSide + ?Sized>(
    system: &R,
    ws: &mut Workspace,
    t: T,
    x: &mut V,
    rates: &V,
    h: f64,
) -> Result<(), SimulationError> {
    system.derivatives(t, x, rates, &mut ws.k[0])?;

    ws.y.copy_from(x);
    ws.y.axpy(0.5 * h, &ws.k[0], 1.0);
    system.derivatives(t + 0.5 * h, &ws.y, rates, &mut ws.k[1])?;

    ws.y.copy_from(x);
    ws.y.axpy(0.5 * h, &ws.k[1], 1.0);
    system.derivatives(t + 0.5 * h, &ws.y, rates, &mut ws.k[2])?;

    ws.y.copy_from(x);
    ws.y.axpy(h, &ws.k[2], 1.0);
    system.derivatives(t + h, &ws.y, rates, &mut ws.k[3])?;

    x.axpy(h / 6.0, &ws.k[0], 1.0);
    x.axpy(h / 3.0, &ws.k[1], 1.0);
    x.axpy(h / 3.0, &ws.k[2], 1.0);
    x.axpy(h / 6.0, &ws.k[3], 1.0);
    Ok(())
}

/// One Dormand-Prince trial step from `x`; the candidate is left in `ws.y`
///
/// Returns the scaled error norm, accepted when `<= 1`.
fn dopri_trial<R: RightHandSide + ?Sized>(
    system: &R,
    ws: &mut Workspace,
    t: T,
    x: &V,
    rates: &V,
    h: f64,
    adaptive: &AdaptiveSettings,
) -> Result<f64, SimulationError> {
    system.derivatives(t, x, rates, &mut ws.k[0])?;
    for stage in 1..7 {
        ws.y.copy_from(x);
        for (m, &a) in A[stage].iter().enumerate().take(stage) {
            if a != 0.0 {
                ws.y.axpy(h * a, &ws.k[m], 1.0);
            }
        }
        system.derivatives(t + C[stage] * h, &ws.y, rates, &mut ws.k[stage])?;
    }

    ws.err.fill(0.0);
    for (m, &e) in E.iter().enumerate() {
        if e != 0.0 {
            ws.err.axpy(h * e, &ws.k[m], 1.0);
        }
    }

    let mut norm = 0.0f64;
    for i in 0..x.len() {
        let scale = adaptive.atol + adaptive.rtol * x[i].abs().max(ws.y[i].abs());
        let ratio = ws.err[i].abs() / scale;
        if ratio.is_nan() {
            return Ok(f64::INFINITY);
        }
        norm = norm.max(ratio);
    }
    Ok(norm)
}
