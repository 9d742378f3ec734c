use crate::data::{Compartment, DoseKind, DosingEvent, ParameterSet, Subject};
use crate::error::{ConfigurationError, SimulationError};
use crate::simulator::{
    integrator::Integrator,
    model::{BoundModel, CompartmentLayout, RtteModel},
    sampler::{CumulativeHazardCurve, EventTimeSampler, HazardPoint, SampledTime},
    settings::{merge_times, same_time, IntegratorSettings, SimulationSettings},
    trajectory::{EventOutcome, SubjectOutcome, TrajectoryRecord, TrajectorySample},
    RightHandSide, V,
};

/// Simulates subjects against one model and one set of settings
///
/// The simulator is immutable once built and can be shared between threads; every call
/// to [Simulator::simulate_subject] owns its own state.
#[derive(Debug, Clone)]
pub struct Simulator {
    model: RtteModel,
    settings: SimulationSettings,
}

/// State of the system right after the events at a breakpoint were applied
struct TracePoint {
    time: f64,
    state: V,
    rates: V,
}

impl Simulator {
    pub fn new(model: RtteModel, settings: SimulationSettings) -> Result<Self, SimulationError> {
        model.validate()?;
        settings.validate()?;
        Ok(Simulator { model, settings })
    }

    pub fn model(&self) -> &RtteModel {
        &self.model
    }

    pub fn settings(&self) -> &SimulationSettings {
        &self.settings
    }

    /// Parameters of a subject with the covariate multiplier folded in as `NU`
    pub fn subject_parameters(&self, subject: &Subject) -> Result<ParameterSet, SimulationError> {
        match self.model.covariate_model() {
            Some(covariates) => {
                let nu = covariates.multiplier(subject.covariates())?;
                Ok(subject.parameters().with_hazard_multiplier(nu))
            }
            None => Ok(subject.parameters().clone()),
        }
    }

    /// Simulate one subject with the uniform draw `draw`
    pub fn simulate_subject(
        &self,
        subject: &Subject,
        draw: f64,
    ) -> Result<SubjectOutcome, SimulationError> {
        self.settings.validate()?;
        if !(0.0..=1.0).contains(&draw) {
            return Err(ConfigurationError::InvalidDraw { value: draw }.into());
        }

        let params = self.subject_parameters(subject)?;
        let resolved = self.model.resolve(&params)?;
        let system = self.model.bind(resolved, self.settings.negative_states);
        let layout = system.layout();

        let grid = &self.settings.grid;
        let (start, horizon) = (grid.start, grid.horizon());
        let events = self.due_events(subject, &layout)?;
        let mut x = initial_state(subject, &layout)?;
        let mut rates = V::zeros(layout.nstates());

        let outputs = grid.times();
        let mut breakpoints = outputs.clone();
        breakpoints.push(start);
        breakpoints.push(horizon);
        breakpoints.extend(events.iter().map(|(_, event)| event.time()));
        let breakpoints = merge_times(breakpoints, &outputs);

        let mut integrator = Integrator::new(self.settings.integrator);
        let mut trace: Vec<TracePoint> = Vec::with_capacity(breakpoints.len());
        let mut samples = Vec::with_capacity(outputs.len());
        let mut next_event = 0;
        let mut next_output = 0;
        let mut t = start;

        for &breakpoint in &breakpoints {
            integrator.advance(&system, &mut x, &rates, t, breakpoint)?;
            t = breakpoint;

            while let Some((index, event)) = events.get(next_event) {
                if event.time() > t && !same_time(event.time(), t) {
                    break;
                }
                apply(event, *index, &mut x, &mut rates);
                next_event += 1;
            }
            system.enforce_domain(t, &mut x)?;

            if next_output < outputs.len() && same_time(outputs[next_output], t) {
                samples.push(sample(&system, t, &x)?);
                next_output += 1;
            }
            trace.push(TracePoint {
                time: t,
                state: x.clone(),
                rates: rates.clone(),
            });
        }

        let points: Vec<HazardPoint> = trace
            .iter()
            .map(|p| HazardPoint {
                time: p.time,
                cumulative_hazard: p.state[layout.hazard()],
            })
            .collect();
        let curve = TraceCurve {
            system: &system,
            trace: &trace,
            settings: self.settings.integrator,
        };
        let sampled = EventTimeSampler::new(self.settings.root_finding).sample(
            &points,
            draw,
            Some(&curve),
        )?;
        let event = match sampled {
            SampledTime::Event(time) => EventOutcome::event(time, self.model.event_name()),
            SampledTime::Censored(time) => EventOutcome::censored(time),
        };

        let stats = integrator.stats();
        tracing::debug!(
            subject = subject.id(),
            time = event.time,
            censored = event.censored,
            steps = stats.total_steps(),
            "subject simulated"
        );

        let compartments = (0..layout.hazard())
            .filter_map(|i| layout.compartment_at(i))
            .map(|c| c.to_string())
            .collect();
        Ok(SubjectOutcome {
            id: subject.id().to_string(),
            draw,
            trajectory: TrajectoryRecord::new(compartments, samples),
            event,
            stats,
        })
    }

    /// Validated dosing events inside the simulated window, with their state index
    fn due_events(
        &self,
        subject: &Subject,
        layout: &CompartmentLayout,
    ) -> Result<Vec<(usize, DosingEvent)>, SimulationError> {
        let grid = &self.settings.grid;
        let mut due = Vec::with_capacity(subject.schedule().len());
        for event in subject.schedule().events() {
            let invalid = |reason: String| ConfigurationError::InvalidDose {
                time: event.time(),
                reason,
            };
            if !event.time().is_finite() {
                return Err(invalid("dose time is not finite".to_string()).into());
            }
            let magnitude = event.magnitude();
            if !(magnitude.is_finite() && magnitude >= 0.0) {
                return Err(invalid(format!(
                    "dose amount or rate must be non-negative, got {magnitude}"
                ))
                .into());
            }
            if event.target() == Compartment::CumulativeHazard {
                return Err(invalid("doses cannot target the cumulative hazard".to_string()).into());
            }
            let index = layout.index_of(event.target()).ok_or_else(|| {
                invalid(format!(
                    "compartment {} is not part of the model",
                    event.target()
                ))
            })?;
            if event.time() < grid.start && !same_time(event.time(), grid.start) {
                return Err(invalid(format!(
                    "dose precedes the simulation start {}",
                    grid.start
                ))
                .into());
            }
            let time = if same_time(event.time(), grid.start) {
                grid.start
            } else if same_time(event.time(), grid.horizon()) {
                grid.horizon()
            } else if event.time() > grid.horizon() {
                tracing::debug!(
                    subject = subject.id(),
                    time = event.time(),
                    "ignoring dose after the horizon"
                );
                continue;
            } else {
                event.time()
            };
            due.push((index, event.at(time)));
        }
        Ok(due)
    }
}

fn initial_state(subject: &Subject, layout: &CompartmentLayout) -> Result<V, SimulationError> {
    let mut x = V::zeros(layout.nstates());
    for (compartment, amount) in subject.initial_amounts() {
        let index =
            layout
                .index_of(*compartment)
                .ok_or_else(|| ConfigurationError::InvalidInitialState {
                    reason: format!("compartment {compartment} is not part of the model"),
                })?;
        if *compartment == Compartment::CumulativeHazard {
            return Err(ConfigurationError::InvalidInitialState {
                reason: "the cumulative hazard always starts at zero".to_string(),
            }
            .into());
        }
        if !(amount.is_finite() && *amount >= 0.0) {
            return Err(ConfigurationError::InvalidInitialState {
                reason: format!("initial amount in {compartment} must be non-negative, got {amount}"),
            }
            .into());
        }
        x[index] += amount;
    }
    Ok(x)
}

fn apply(event: &DosingEvent, index: usize, x: &mut V, rates: &mut V) {
    match event.kind() {
        DoseKind::Bolus { amount } => x[index] += amount,
        DoseKind::InfusionStart { rate } => rates[index] += rate,
        // overlapping infusions may leave round-off below zero
        DoseKind::InfusionStop { rate } => rates[index] = (rates[index] - rate).max(0.0),
    }
}

fn sample(system: &BoundModel<'_>, t: f64, x: &V) -> Result<TrajectorySample, SimulationError> {
    let layout = system.layout();
    Ok(TrajectorySample {
        time: t,
        amounts: x.iter().take(layout.hazard()).copied().collect(),
        concentration: system.concentration(x),
        hazard: system.hazard(t, x)?,
        cumulative_hazard: x[layout.hazard()],
    })
}

/// Cumulative hazard inside a breakpoint segment, re-integrated from its start
struct TraceCurve<'a> {
    system: &'a BoundModel<'a>,
    trace: &'a [TracePoint],
    settings: IntegratorSettings,
}

impl CumulativeHazardCurve for TraceCurve<'_> {
    fn cumulative_hazard(&self, segment: usize, t: f64) -> Result<f64, SimulationError> {
        let point = self.trace.get(segment).ok_or_else(|| {
            SimulationError::RootFinding(format!("no trajectory segment {segment}"))
        })?;
        let hazard = self.system.layout().hazard();
        if t <= point.time {
            return Ok(point.state[hazard]);
        }
        let mut x = point.state.clone();
        let mut integrator = Integrator::new(self.settings);
        integrator.advance(self.system, &mut x, &point.rates, point.time, t)?;
        Ok(x[hazard])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::settings::OutputGrid;
    use approx::assert_relative_eq;

    fn iv_model() -> RtteModel {
        RtteModel::new(0, false)
    }

    fn iv_params() -> ParameterSet {
        ParameterSet::new()
            .with("CL", 1.0)
            .with("VC", 20.0)
            .with("LAMBDA", 0.01)
    }

    fn simulator(grid: OutputGrid) -> Simulator {
        Simulator::new(iv_model(), SimulationSettings::new(grid)).unwrap()
    }

    #[test]
    fn samples_at_a_dose_time_are_post_dose() {
        let subject = Subject::builder("1")
            .parameters(iv_params())
            .bolus(2.0, 100.0, Compartment::Central)
            .build();
        let outcome = simulator(OutputGrid::new(0.0, 4.0, 1.0))
            .simulate_subject(&subject, 0.5)
            .unwrap();
        let samples = outcome.trajectory.samples();
        assert_eq!(samples.len(), 5);
        assert_eq!(samples[1].amounts[0], 0.0);
        assert_eq!(samples[2].amounts[0], 100.0);
        assert_relative_eq!(samples[2].concentration, 5.0);
    }

    #[test]
    fn doses_between_output_times_become_breakpoints() {
        let subject = Subject::builder("1")
            .parameters(iv_params())
            .bolus(0.35, 100.0, Compartment::Central)
            .build();
        let outcome = simulator(OutputGrid::new(0.0, 2.0, 1.0))
            .simulate_subject(&subject, 0.5)
            .unwrap();
        let expected = 100.0 * (-(1.0 - 0.35) / 20.0f64).exp();
        assert_relative_eq!(
            outcome.trajectory.samples()[1].amounts[0],
            expected,
            max_relative = 1e-6
        );
    }

    #[test]
    fn infusion_accumulates_its_amount() {
        let model = RtteModel::new(0, false);
        let params = ParameterSet::new()
            .with("CL", 0.0)
            .with("VC", 10.0)
            .with("LAMBDA", 0.0);
        let subject = Subject::builder("1")
            .parameters(params)
            .infusion(1.0, 50.0, Compartment::Central, 2.5)
            .build();
        let sim = Simulator::new(model, SimulationSettings::new(OutputGrid::new(0.0, 5.0, 0.5)))
            .unwrap();
        let outcome = sim.simulate_subject(&subject, 0.5).unwrap();
        let central = outcome.trajectory.amounts_of("CENT").unwrap();
        assert_relative_eq!(central[2], 0.0);
        assert_relative_eq!(central[4], 20.0, max_relative = 1e-9);
        assert_relative_eq!(*central.last().unwrap(), 50.0, max_relative = 1e-9);
        assert!(outcome.event.censored);
    }

    #[test]
    fn invalid_doses_are_rejected_before_integration() {
        let sim = simulator(OutputGrid::new(0.0, 10.0, 1.0));

        let into_hazard = Subject::builder("1")
            .parameters(iv_params())
            .bolus(1.0, 1.0, Compartment::CumulativeHazard)
            .build();
        let missing = Subject::builder("2")
            .parameters(iv_params())
            .bolus(1.0, 1.0, Compartment::Peripheral)
            .build();
        let early = Subject::builder("3")
            .parameters(iv_params())
            .bolus(-1.0, 1.0, Compartment::Central)
            .build();
        let negative = Subject::builder("4")
            .parameters(iv_params())
            .bolus(1.0, -5.0, Compartment::Central)
            .build();

        for subject in [into_hazard, missing, early, negative] {
            let err = sim.simulate_subject(&subject, 0.5).unwrap_err();
            assert!(
                matches!(
                    err,
                    SimulationError::Configuration(ConfigurationError::InvalidDose { .. })
                ),
                "subject {}: {err}",
                subject.id()
            );
        }
    }

    #[test]
    fn doses_after_the_horizon_are_ignored() {
        let subject = Subject::builder("1")
            .parameters(iv_params())
            .bolus(50.0, 100.0, Compartment::Central)
            .build();
        let outcome = simulator(OutputGrid::new(0.0, 10.0, 1.0))
            .simulate_subject(&subject, 0.5)
            .unwrap();
        assert!(outcome
            .trajectory
            .samples()
            .iter()
            .all(|s| s.amounts[0] == 0.0));
    }

    #[test]
    fn missing_parameter_is_a_configuration_error() {
        let subject = Subject::builder("1")
            .parameter("CL", 1.0)
            .parameter("LAMBDA", 0.1)
            .build();
        let err = simulator(OutputGrid::default())
            .simulate_subject(&subject, 0.5)
            .unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Configuration(ConfigurationError::MissingParameter { ref name }) if name == "VC"
        ));
    }

    #[test]
    fn initial_amounts_seed_the_state() {
        let subject = Subject::builder("1")
            .parameters(iv_params())
            .initial_amount(Compartment::Central, 40.0)
            .build();
        let outcome = simulator(OutputGrid::new(0.0, 1.0, 1.0))
            .simulate_subject(&subject, 0.5)
            .unwrap();
        assert_eq!(outcome.trajectory.samples()[0].amounts[0], 40.0);

        let bad = Subject::builder("2")
            .parameters(iv_params())
            .initial_amount(Compartment::Depot(1), 40.0)
            .build();
        assert!(simulator(OutputGrid::new(0.0, 1.0, 1.0))
            .simulate_subject(&bad, 0.5)
            .is_err());
    }

    #[test]
    fn cumulative_hazard_cannot_be_seeded() {
        let subject = Subject::builder("1")
            .parameters(iv_params())
            .initial_amount(Compartment::CumulativeHazard, 0.5)
            .build();
        let err = simulator(OutputGrid::new(0.0, 1.0, 1.0))
            .simulate_subject(&subject, 0.5)
            .unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Configuration(ConfigurationError::InvalidInitialState { .. })
        ));
    }

    #[test]
    fn censoring_lands_on_a_horizon_missed_by_the_grid_spacing() {
        let subject = Subject::builder("1")
            .parameters(iv_params().with("LAMBDA", 0.0))
            .bolus(0.0, 100.0, Compartment::Central)
            .build();
        let outcome = simulator(OutputGrid::new(0.0, 0.9, 0.3))
            .simulate_subject(&subject, 0.5)
            .unwrap();
        assert!(outcome.event.censored);
        assert_eq!(outcome.event.time, 0.9);
        assert_eq!(outcome.trajectory.len(), 4);
        assert_eq!(outcome.trajectory.samples().last().unwrap().time, 0.9);
    }

    #[test]
    fn doses_within_tolerance_of_the_window_snap_onto_it() {
        let subject = Subject::builder("1")
            .parameters(iv_params())
            .bolus(10.0 - 5e-9, 100.0, Compartment::Central)
            .bolus(20.0 + 5e-9, 50.0, Compartment::Central)
            .build();
        let outcome = simulator(OutputGrid::new(10.0, 20.0, 1.0))
            .simulate_subject(&subject, 0.5)
            .unwrap();
        let samples = outcome.trajectory.samples();
        assert_eq!(samples[0].time, 10.0);
        assert_eq!(samples[0].amounts[0], 100.0);

        let last = samples.last().unwrap();
        assert_eq!(last.time, 20.0);
        assert_relative_eq!(
            last.amounts[0],
            100.0 * (-10.0 / 20.0f64).exp() + 50.0,
            max_relative = 1e-6
        );
    }

    #[test]
    fn covariates_scale_the_hazard() {
        let sim = Simulator::new(
            RtteModel::rtte_emax(),
            SimulationSettings::new(OutputGrid::new(0.0, 180.0, 1.0)),
        )
        .unwrap();
        let base = Subject::builder("1")
            .parameters(ParameterSet::rtte_defaults())
            .category("ECOG", 0, &[1, 2])
            .covariate("cAGE", 0.0)
            .build();
        let sicker = Subject::builder("2")
            .parameters(ParameterSet::rtte_defaults())
            .category("ECOG", 2, &[1, 2])
            .covariate("cAGE", 0.0)
            .build();

        let h0 = sim.simulate_subject(&base, 0.99).unwrap();
        let h2 = sim.simulate_subject(&sicker, 0.99).unwrap();
        let ratio = h2.trajectory.samples()[10].hazard / h0.trajectory.samples()[10].hazard;
        assert_relative_eq!(ratio, 0.223f64.exp(), max_relative = 1e-12);
        assert!(h2.event.time < h0.event.time);

        let unknown = Subject::builder("3")
            .parameters(ParameterSet::rtte_defaults())
            .build();
        assert!(matches!(
            sim.simulate_subject(&unknown, 0.5),
            Err(SimulationError::Configuration(
                ConfigurationError::MissingCovariate { .. }
            ))
        ));
    }
}
