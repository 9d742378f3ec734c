use crate::data::*;

/// Fluent construction of a [Subject]
///
/// ```
/// use rttesim::prelude::*;
///
/// let subject = Subject::builder("1")
///     .parameters(ParameterSet::rtte_defaults())
///     .bolus(0.0, 100.0, Compartment::Depot(1))
///     .repeat(6, 24.0)
///     .category("ECOG", 1, &[1, 2])
///     .covariate("cAGE", 0.0)
///     .build();
/// assert_eq!(subject.schedule().len(), 7);
/// ```
pub struct SubjectBuilder {
    id: String,
    parameters: ParameterSet,
    covariates: CovariateRecord,
    schedule: DosingSchedule,
    initial_amounts: Vec<(Compartment, f64)>,
    draw: Option<f64>,
    last_added: Vec<DosingEvent>,
}

impl SubjectBuilder {
    pub(crate) fn new(id: String) -> Self {
        SubjectBuilder {
            id,
            parameters: ParameterSet::new(),
            covariates: CovariateRecord::new(),
            schedule: DosingSchedule::new(),
            initial_amounts: Vec::new(),
            draw: None,
            last_added: Vec::new(),
        }
    }

    pub fn parameters(mut self, parameters: ParameterSet) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn parameter(mut self, name: &str, value: f64) -> Self {
        self.parameters.insert(name, value);
        self
    }

    pub fn covariate(mut self, name: &str, value: f64) -> Self {
        self.covariates.insert(name, value);
        self
    }

    /// Categorical covariate, see [CovariateRecord::with_category]
    pub fn category(mut self, name: &str, value: i64, levels: &[i64]) -> Self {
        self.covariates = self.covariates.with_category(name, value, levels);
        self
    }

    pub fn event(mut self, event: DosingEvent) -> Self {
        self.schedule.push(event.clone());
        self.last_added = vec![event];
        self
    }

    pub fn bolus(self, time: f64, amount: f64, target: Compartment) -> Self {
        self.event(DosingEvent::bolus(time, target, amount))
    }

    pub fn infusion(mut self, time: f64, amount: f64, target: Compartment, duration: f64) -> Self {
        let mut single = DosingSchedule::new();
        single.infusion(time, target, amount, duration);
        for event in single.events() {
            self.schedule.push(event.clone());
        }
        self.last_added = single.events().to_vec();
        self
    }

    /// Repeat the last dose `n` more times, every `delta` time units
    ///
    /// An infusion is repeated as a whole (start and stop). Without a previous dose this
    /// is a no-op.
    pub fn repeat(mut self, n: usize, delta: f64) -> Self {
        let template = std::mem::take(&mut self.last_added);
        for i in 1..=n {
            for event in &template {
                self.schedule.push(event.shifted(delta * i as f64));
            }
        }
        self.last_added = template;
        self
    }

    pub fn initial_amount(mut self, target: Compartment, amount: f64) -> Self {
        self.initial_amounts.push((target, amount));
        self
    }

    /// Fix the uniform draw used for the event time of this subject
    pub fn draw(mut self, u: f64) -> Self {
        self.draw = Some(u);
        self
    }

    pub fn build(self) -> Subject {
        Subject::new(
            self.id,
            self.parameters,
            self.covariates,
            self.schedule,
            self.initial_amounts,
            self.draw,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_copies_the_last_dose() {
        let subject = Subject::builder("1")
            .bolus(0.0, 100.0, Compartment::Depot(1))
            .repeat(2, 12.0)
            .build();
        assert_eq!(subject.schedule().times(), vec![0.0, 12.0, 24.0]);
    }

    #[test]
    fn repeat_copies_whole_infusions() {
        let subject = Subject::builder("1")
            .infusion(0.0, 60.0, Compartment::Central, 2.0)
            .repeat(1, 24.0)
            .build();
        assert_eq!(subject.schedule().times(), vec![0.0, 2.0, 24.0, 26.0]);
        assert_eq!(subject.schedule().total_amount(Compartment::Central), 120.0);
    }

    #[test]
    fn builder_collects_everything() {
        let subject = Subject::builder("abc")
            .parameter("CL", 1.0)
            .covariate("cAGE", -0.3)
            .initial_amount(Compartment::Central, 5.0)
            .draw(0.25)
            .build();
        assert_eq!(subject.id(), "abc");
        assert_eq!(subject.parameters().get("CL"), Some(1.0));
        assert_eq!(subject.covariates().get("cAGE"), Some(-0.3));
        assert_eq!(subject.initial_amounts(), &[(Compartment::Central, 5.0)]);
        assert_eq!(subject.draw(), Some(0.25));
    }
}
