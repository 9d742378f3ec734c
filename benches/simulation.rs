use criterion::black_box;
use criterion::{criterion_group, criterion_main, Criterion};
use rttesim::prelude::*;

fn rtte_subject(id: usize) -> Subject {
    Subject::builder(id.to_string())
        .parameters(ParameterSet::rtte_defaults())
        .category("ECOG", (id % 3) as i64, &[1, 2])
        .covariate("cAGE", 0.1 * (id % 5) as f64)
        .bolus(0.0, 100.0, Compartment::Depot(1))
        .repeat(6, 24.0)
        .build()
}

fn pk2cmt_subject() -> Subject {
    Subject::builder("1")
        .parameters(ParameterSet::pk2cmt_defaults().with("VMAX", 3.0))
        .bolus(0.0, 100.0, Compartment::Depot(1))
        .repeat(13, 24.0)
        .infusion(0.0, 200.0, Compartment::Depot(2), 4.0)
        .build()
}

fn simulate_once(simulator: &Simulator, subject: &Subject) {
    black_box(simulator.simulate_subject(subject, 0.3).ok());
}

fn criterion_benchmark(c: &mut Criterion) {
    let grid = OutputGrid::new(0.0, 180.0, 0.1);

    let fixed = Simulator::new(RtteModel::rtte_emax(), SimulationSettings::new(grid.clone()))
        .expect("valid settings");
    let subject = rtte_subject(1);
    c.bench_function("rtte_fixed_step", |b| b.iter(|| simulate_once(&fixed, &subject)));

    let adaptive = Simulator::new(
        RtteModel::rtte_emax(),
        SimulationSettings::new(grid)
            .with_integrator(IntegratorSettings::adaptive(Default::default())),
    )
    .expect("valid settings");
    c.bench_function("rtte_adaptive", |b| b.iter(|| simulate_once(&adaptive, &subject)));

    let pk2cmt = Simulator::new(
        RtteModel::pk2cmt_hazard(),
        SimulationSettings::new(OutputGrid::new(0.0, 24.0 * 14.0, 1.0)),
    )
    .expect("valid settings");
    let subject = pk2cmt_subject();
    c.bench_function("pk2cmt_two_weeks", |b| {
        b.iter(|| black_box(pk2cmt.simulate_subject(&subject, 0.5).ok()))
    });

    let population: Vec<Subject> = (0..200).map(rtte_subject).collect();
    let options = BatchOptions::new(42);
    c.bench_function("rtte_population_200", |b| {
        b.iter(|| black_box(fixed.simulate_population(&population, &options).summary()))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
