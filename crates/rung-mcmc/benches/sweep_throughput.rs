use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use rung_core::{Model, ParamPrior};

use rung_mcmc::{run, ExecutionMode, RunConfig};

fn banana_model() -> Model {
    let priors = (0..4)
        .map(|i| ParamPrior::new(format!("x{i}"), -20.0, 20.0))
        .collect();
    Model::with_uniform_prior(priors, |x: &[f64]| {
        let bend = x[1] - x[0] * x[0];
        -0.5 * (x[0] * x[0] + 10.0 * bend * bend + x[2] * x[2] + x[3] * x[3])
    })
    .unwrap()
}

fn bench_sweep(c: &mut Criterion) {
    let model = banana_model();
    let mut group = c.benchmark_group("tempering_run");
    for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
        let mut config = RunConfig::default();
        config.n_chains = 6;
        config.n_iter = 2_000;
        config.swap_start_iter = 0;
        config.adapt_interval = 250;
        config.print_interval = 1_000_000;
        config.execution.mode = mode;
        let starts = vec![vec![0.0; 4]; config.n_chains];
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{mode:?}")),
            &config,
            |b, config| {
                b.iter(|| {
                    let report = run(config, &model, &starts, None).unwrap();
                    criterion::black_box(report.coldest().map(|chain| chain.max_log_likelihood()));
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_sweep);
criterion_main!(benches);
