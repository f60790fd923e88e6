use criterion::{black_box, criterion_group, criterion_main, Criterion};
use steadyrs::fiscal_growth::{self, baseline_targets, structural_parameters};
use steadyrs::{InitialGuess, SolverConfig};

fn steady_state_benchmarks(c: &mut Criterion) {
    let config = SolverConfig::default();
    let guesses = InitialGuess::new();
    let targets = baseline_targets();

    let closed_form = fiscal_growth::closed_form_problem().expect("valid model");
    c.bench_function("closed_form_calibration", |b| {
        b.iter(|| {
            closed_form
                .compute_steady_state(black_box(&targets), &guesses, &config)
                .expect("consistent targets")
        })
    });

    let calibrated = closed_form
        .compute_steady_state(&targets, &guesses, &config)
        .expect("consistent targets");
    let structural = structural_parameters(&calibrated).expect("calibrated parameters");
    let numerical = fiscal_growth::numerical_problem().expect("valid model");
    c.bench_function("numerical_labour_solve", |b| {
        b.iter(|| {
            numerical
                .compute_steady_state(black_box(&structural), &guesses, &config)
                .expect("converged")
        })
    });
}

criterion_group!(benches, steady_state_benchmarks);
criterion_main!(benches);
