//! Compartmental PK model coupled to a cumulative-hazard compartment
//!
//! The state vector is laid out as `[EV1, EV2, CENT, PERIPH, CHAZARD]`, with the depots
//! and the peripheral compartment only present when the model enables them. The
//! cumulative hazard is always the last state.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::data::{Compartment, CovariateModel, ParameterSet, HAZARD_MULTIPLIER};
use crate::error::{ConfigurationError, SimulationError};
use crate::simulator::{RightHandSide, T, V};

/// Hours per year, the usual scale when hazards are reported per year in an hourly model
pub const HOURS_PER_YEAR: f64 = 24.0 * 365.0;

/// Shape of the baseline hazard `h0(t)`
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BaselineHazard {
    /// `h0 = LAMBDA / s`
    #[default]
    Constant,
    /// `h0 = (LAMBDA / s) * exp(GAMMA * (t / s - 1))`
    TimeTrend,
}

/// How plasma concentration modulates the hazard
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DrugEffect {
    #[default]
    None,
    /// `1 + EMAX * CP / (EC50 + CP)`
    Emax,
    /// `1 - CP / (IC50 + CP)`
    Inhibitory,
}

/// What to do when a mass compartment becomes negative through integrator overshoot
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum NegativeStatePolicy {
    /// Treat negative amounts as zero
    #[default]
    Clamp,
    /// Fail with [SimulationError::InvalidState] below `-tolerance`, clamp above it
    Strict { tolerance: f64 },
}

/// Position of every compartment in the state vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompartmentLayout {
    depots: usize,
    peripheral: bool,
}

impl CompartmentLayout {
    pub fn new(depots: usize, peripheral: bool) -> Self {
        CompartmentLayout { depots, peripheral }
    }

    pub fn nstates(&self) -> usize {
        self.depots + 2 + usize::from(self.peripheral)
    }

    pub fn depots(&self) -> usize {
        self.depots
    }

    pub fn central(&self) -> usize {
        self.depots
    }

    pub fn peripheral(&self) -> Option<usize> {
        self.peripheral.then_some(self.depots + 1)
    }

    pub fn hazard(&self) -> usize {
        self.nstates() - 1
    }

    pub fn index_of(&self, compartment: Compartment) -> Option<usize> {
        match compartment {
            Compartment::Depot(n) if n >= 1 && n <= self.depots => Some(n - 1),
            Compartment::Depot(_) => None,
            Compartment::Central => Some(self.central()),
            Compartment::Peripheral => self.peripheral(),
            Compartment::CumulativeHazard => Some(self.hazard()),
        }
    }

    pub fn compartment_at(&self, index: usize) -> Option<Compartment> {
        if index < self.depots {
            Some(Compartment::Depot(index + 1))
        } else if index == self.central() {
            Some(Compartment::Central)
        } else if Some(index) == self.peripheral() {
            Some(Compartment::Peripheral)
        } else if index == self.hazard() {
            Some(Compartment::CumulativeHazard)
        } else {
            None
        }
    }

    /// Names of the states in order, e.g. `["EV1", "CENT", "CHAZARD"]`
    pub fn names(&self) -> Vec<String> {
        (0..self.nstates())
            .filter_map(|i| self.compartment_at(i))
            .map(|c| c.to_string())
            .collect()
    }

    /// Whether the state holds drug mass, as opposed to cumulative hazard
    pub fn is_mass(&self, index: usize) -> bool {
        index < self.hazard()
    }
}

/// Structure and options of the model, shared read-only by every subject
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RtteModel {
    #[serde(default = "default_event_name")]
    event_name: String,
    depots: usize,
    #[serde(default)]
    peripheral: bool,
    #[serde(default)]
    nonlinear_clearance: bool,
    #[serde(default)]
    covariate_effects: bool,
    #[serde(default)]
    baseline: BaselineHazard,
    #[serde(default)]
    drug_effect: DrugEffect,
    #[serde(default = "default_time_scale")]
    hazard_time_scale: f64,
    #[serde(default)]
    covariate_model: Option<CovariateModel>,
}

fn default_event_name() -> String {
    "event".to_string()
}

fn default_time_scale() -> f64 {
    1.0
}

impl RtteModel {
    /// Linear model with `depots` absorption depots, constant baseline hazard and no drug effect
    pub fn new(depots: usize, peripheral: bool) -> Self {
        RtteModel {
            event_name: default_event_name(),
            depots,
            peripheral,
            nonlinear_clearance: false,
            covariate_effects: false,
            baseline: BaselineHazard::Constant,
            drug_effect: DrugEffect::None,
            hazard_time_scale: default_time_scale(),
            covariate_model: None,
        }
    }

    /// One depot (GUT), central compartment and an Emax effect on a constant hazard,
    /// modulated by ECOG status and centered age.
    ///
    /// Pairs with [ParameterSet::rtte_defaults].
    pub fn rtte_emax() -> Self {
        RtteModel::new(1, false)
            .with_drug_effect(DrugEffect::Emax)
            .with_covariate_model(CovariateModel::ecog_age())
    }

    /// Dual first-order absorption, two compartments with optional Michaelis-Menten
    /// clearance, and an inhibitory effect on a per-year hazard with a time trend.
    ///
    /// Time is in hours. Pairs with [ParameterSet::pk2cmt_defaults].
    pub fn pk2cmt_hazard() -> Self {
        RtteModel::new(2, true)
            .with_nonlinear_clearance(true)
            .with_baseline(BaselineHazard::TimeTrend)
            .with_drug_effect(DrugEffect::Inhibitory)
            .with_hazard_time_scale(HOURS_PER_YEAR)
    }

    pub fn with_event_name(mut self, name: impl Into<String>) -> Self {
        self.event_name = name.into();
        self
    }

    pub fn with_nonlinear_clearance(mut self, enabled: bool) -> Self {
        self.nonlinear_clearance = enabled;
        self
    }

    pub fn with_baseline(mut self, baseline: BaselineHazard) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn with_drug_effect(mut self, effect: DrugEffect) -> Self {
        self.drug_effect = effect;
        self
    }

    /// Model time units per hazard time unit
    pub fn with_hazard_time_scale(mut self, scale: f64) -> Self {
        self.hazard_time_scale = scale;
        self
    }

    /// Expect the hazard multiplier `NU` in every parameter set
    pub fn with_covariate_effects(mut self, enabled: bool) -> Self {
        self.covariate_effects = enabled;
        if !enabled {
            self.covariate_model = None;
        }
        self
    }

    /// Derive `NU` from each subject's covariates with the given model
    pub fn with_covariate_model(mut self, model: CovariateModel) -> Self {
        self.covariate_model = Some(model);
        self
    }

    pub fn from_json_str(json: &str) -> Result<Self, SimulationError> {
        let model: RtteModel = serde_json::from_str(json)?;
        model.validate()?;
        Ok(model)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SimulationError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    pub fn layout(&self) -> CompartmentLayout {
        CompartmentLayout::new(self.depots, self.peripheral)
    }

    pub fn covariate_model(&self) -> Option<&CovariateModel> {
        self.covariate_model.as_ref()
    }

    /// Whether the hazard multiplier `NU` takes part in the hazard
    pub fn covariate_effects(&self) -> bool {
        self.covariate_effects || self.covariate_model.is_some()
    }

    /// Check the structural options
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.depots > 2 {
            return Err(ConfigurationError::InvalidSettings {
                reason: format!("at most two absorption depots are supported, got {}", self.depots),
            });
        }
        if !self.hazard_time_scale.is_finite() || self.hazard_time_scale <= 0.0 {
            return Err(ConfigurationError::InvalidSettings {
                reason: format!(
                    "hazard time scale must be positive, got {}",
                    self.hazard_time_scale
                ),
            });
        }
        Ok(())
    }

    /// Validate a parameter set against this model and extract the values it needs
    pub fn resolve(&self, params: &ParameterSet) -> Result<ResolvedParameters, ConfigurationError> {
        self.validate()?;

        let cl = params.require_non_negative("CL")?;
        let vc = params.require_positive("VC")?;
        let (q, vp) = if self.peripheral {
            (
                params.require_non_negative("Q")?,
                params.require_positive("VP")?,
            )
        } else {
            (0.0, 1.0)
        };

        let mut ka = [0.0; 2];
        for (k, slot) in ka.iter_mut().enumerate().take(self.depots) {
            *slot = params.require_non_negative(&format!("KA{}", k + 1))?;
        }

        let (vmax, km) = if self.nonlinear_clearance {
            (
                params.require_non_negative("VMAX")?,
                params.require_positive("KM")?,
            )
        } else {
            (0.0, 1.0)
        };

        let lambda = params.require_non_negative("LAMBDA")?;
        let gamma = match self.baseline {
            BaselineHazard::Constant => 0.0,
            BaselineHazard::TimeTrend => params.require("GAMMA")?,
        };

        let (emax, ec50, ic50) = match self.drug_effect {
            DrugEffect::None => (0.0, 1.0, 1.0),
            DrugEffect::Emax => {
                let emax = params.require("EMAX")?;
                if emax < -1.0 {
                    return Err(ConfigurationError::InvalidParameter {
                        name: "EMAX".to_string(),
                        value: emax,
                        reason: "must be at least -1 to keep the hazard non-negative".to_string(),
                    });
                }
                (emax, params.require_positive("EC50")?, 1.0)
            }
            DrugEffect::Inhibitory => (0.0, 1.0, params.require_positive("IC50")?),
        };

        let nu = if self.covariate_effects() {
            params.require_positive(HAZARD_MULTIPLIER)?
        } else {
            1.0
        };

        Ok(ResolvedParameters {
            cl,
            vc,
            q,
            vp,
            ka,
            vmax,
            km,
            lambda,
            gamma,
            emax,
            ec50,
            ic50,
            nu,
        })
    }

    /// Attach one subject's resolved parameters, ready for integration
    pub fn bind(&self, params: ResolvedParameters, policy: NegativeStatePolicy) -> BoundModel<'_> {
        BoundModel {
            model: self,
            layout: self.layout(),
            params,
            policy,
        }
    }
}

/// Validated parameter values in the form the evaluator uses
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedParameters {
    pub cl: f64,
    pub vc: f64,
    pub q: f64,
    pub vp: f64,
    pub ka: [f64; 2],
    pub vmax: f64,
    pub km: f64,
    pub lambda: f64,
    pub gamma: f64,
    pub emax: f64,
    pub ec50: f64,
    pub ic50: f64,
    pub nu: f64,
}

/// A model bound to the parameters of one subject
#[derive(Debug, Clone)]
pub struct BoundModel<'a> {
    model: &'a RtteModel,
    layout: CompartmentLayout,
    params: ResolvedParameters,
    policy: NegativeStatePolicy,
}

impl BoundModel<'_> {
    pub fn layout(&self) -> CompartmentLayout {
        self.layout
    }

    pub fn parameters(&self) -> &ResolvedParameters {
        &self.params
    }

    /// Plasma concentration `CENT / VC`, as stored in the state
    pub fn concentration(&self, x: &V) -> f64 {
        x[self.layout.central()] / self.params.vc
    }

    /// Concentration used by saturable and effect terms, with overshoot handled per policy
    fn effective_concentration(&self, t: T, x: &V) -> Result<f64, SimulationError> {
        let amount = x[self.layout.central()];
        if amount >= 0.0 {
            return Ok(amount / self.params.vc);
        }
        match self.policy {
            NegativeStatePolicy::Clamp => Ok(0.0),
            NegativeStatePolicy::Strict { tolerance } if amount < -tolerance => {
                Err(SimulationError::InvalidState {
                    time: t,
                    compartment: Compartment::Central.to_string(),
                    amount,
                })
            }
            NegativeStatePolicy::Strict { .. } => Ok(0.0),
        }
    }

    /// Baseline hazard at time `t`, in model time units
    pub fn baseline_hazard(&self, t: T) -> f64 {
        let s = self.model.hazard_time_scale;
        let rate = self.params.lambda / s;
        match self.model.baseline {
            BaselineHazard::Constant => rate,
            BaselineHazard::TimeTrend => rate * (self.params.gamma * (t / s - 1.0)).exp(),
        }
    }

    fn drug_effect(&self, t: T, cp: f64) -> Result<f64, SimulationError> {
        let p = &self.params;
        match self.model.drug_effect {
            DrugEffect::None => Ok(1.0),
            DrugEffect::Emax => {
                let denominator = p.ec50 + cp;
                if denominator == 0.0 {
                    return Err(domain(t, "EC50 + CP is zero"));
                }
                Ok(1.0 + p.emax * cp / denominator)
            }
            DrugEffect::Inhibitory => {
                let denominator = p.ic50 + cp;
                if denominator == 0.0 {
                    return Err(domain(t, "IC50 + CP is zero"));
                }
                Ok(1.0 - cp / denominator)
            }
        }
    }

    fn hazard_at(&self, t: T, cp: f64) -> Result<f64, SimulationError> {
        Ok(self.baseline_hazard(t) * self.drug_effect(t, cp)? * self.params.nu)
    }

    /// Instantaneous hazard, identical to the rate integrated into the cumulative hazard
    pub fn hazard(&self, t: T, x: &V) -> Result<f64, SimulationError> {
        let cp = self.effective_concentration(t, x)?;
        self.hazard_at(t, cp)
    }
}

impl RightHandSide for BoundModel<'_> {
    fn nstates(&self) -> usize {
        self.layout.nstates()
    }

    fn derivatives(&self, t: T, x: &V, rates: &V, dx: &mut V) -> Result<(), SimulationError> {
        let p = &self.params;
        let central = self.layout.central();
        let cp = x[central] / p.vc;
        let cp_effective = self.effective_concentration(t, x)?;

        dx.fill(0.0);

        let mut absorbed = 0.0;
        for k in 0..self.layout.depots() {
            let flux = p.ka[k] * x[k];
            dx[k] = -flux + rates[k];
            absorbed += flux;
        }

        let saturable = if self.model.nonlinear_clearance {
            let denominator = p.km + cp_effective;
            if denominator == 0.0 {
                return Err(domain(t, "KM + CP is zero"));
            }
            p.vmax * cp_effective / denominator
        } else {
            0.0
        };

        dx[central] = absorbed - p.cl * cp - saturable + rates[central];

        if let Some(peripheral) = self.layout.peripheral() {
            let ct = x[peripheral] / p.vp;
            let exchange = p.q * cp - p.q * ct;
            dx[central] -= exchange;
            dx[peripheral] = exchange + rates[peripheral];
        }

        dx[self.layout.hazard()] = self.hazard_at(t, cp_effective)?;

        if let Some(index) = dx.iter().position(|v| !v.is_finite()) {
            return Err(domain(
                t,
                &format!("derivative of state {index} is not finite"),
            ));
        }
        Ok(())
    }

    fn enforce_domain(&self, t: T, x: &mut V) -> Result<(), SimulationError> {
        for i in 0..self.layout.hazard() {
            let amount = x[i];
            if amount >= 0.0 {
                continue;
            }
            if let NegativeStatePolicy::Strict { tolerance } = self.policy {
                if amount < -tolerance {
                    return Err(SimulationError::InvalidState {
                        time: t,
                        compartment: self
                            .layout
                            .compartment_at(i)
                            .map(|c| c.to_string())
                            .unwrap_or_else(|| i.to_string()),
                        amount,
                    });
                }
            }
            tracing::trace!(t, state = i, amount, "clamping negative amount to zero");
            x[i] = 0.0;
        }
        Ok(())
    }
}

fn domain(t: T, reason: &str) -> SimulationError {
    SimulationError::Domain {
        time: t,
        reason: reason.to_string(),
    }
}
