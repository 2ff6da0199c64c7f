use rung_core::{Model, ParamPrior};

use rung_mcmc::determinism::{chain_seed, exchange_seed};
use rung_mcmc::{run, ExecutionMode, RunConfig, RunReport};

fn gaussian_model() -> Model {
    Model::with_uniform_prior(
        vec![ParamPrior::new("a", -10.0, 10.0), ParamPrior::new("b", -10.0, 10.0)],
        |x: &[f64]| -0.5 * (x[0] * x[0] + x[1] * x[1]),
    )
    .unwrap()
}

fn deterministic_config(mode: ExecutionMode) -> RunConfig {
    let mut config = RunConfig::default();
    config.n_chains = 4;
    config.n_iter = 200;
    config.t_max = Some(20.0);
    config.swap_start_iter = 0;
    config.adapt_interval = 50;
    config.execution.mode = mode;
    config
}

fn starts() -> Vec<Vec<f64>> {
    vec![vec![1.0, -1.0], vec![2.0, 0.0], vec![-3.0, 1.0], vec![4.0, 4.0]]
}

fn histories(report: &RunReport) -> Vec<Vec<Vec<f64>>> {
    (0..report.chains.len())
        .map(|index| {
            report
                .chain(index)
                .unwrap()
                .history()
                .iter()
                .map(|row| row.point.clone())
                .collect()
        })
        .collect()
}

#[test]
fn repeated_runs_with_same_seed_match() {
    let config = deterministic_config(ExecutionMode::Parallel);
    let first = run(&config, &gaussian_model(), &starts(), None).unwrap();
    let second = run(&config, &gaussian_model(), &starts(), None).unwrap();
    assert!(first.is_success() && second.is_success());
    assert_eq!(histories(&first), histories(&second));
    assert_eq!(first.ladder, second.ladder);
}

#[test]
fn parallel_and_sequential_runs_agree() {
    let parallel = run(
        &deterministic_config(ExecutionMode::Parallel),
        &gaussian_model(),
        &starts(),
        None,
    )
    .unwrap();
    let sequential = run(
        &deterministic_config(ExecutionMode::Sequential),
        &gaussian_model(),
        &starts(),
        None,
    )
    .unwrap();
    assert_eq!(histories(&parallel), histories(&sequential));
    assert_eq!(parallel.ladder, sequential.ladder);
    for index in 0..4 {
        let a = parallel.chain(index).unwrap();
        let b = sequential.chain(index).unwrap();
        assert_eq!(a.swap_accepted(), b.swap_accepted());
        assert_eq!(a.swap_proposed(), b.swap_proposed());
        assert_eq!(a.beta(), b.beta());
    }
}

#[test]
fn master_seed_changes_the_streams() {
    let config = deterministic_config(ExecutionMode::Sequential);
    let mut reseeded = config.clone();
    reseeded.seed_policy.master_seed ^= 0xFFFF;
    let a = run(&config, &gaussian_model(), &starts(), None).unwrap();
    let b = run(&reseeded, &gaussian_model(), &starts(), None).unwrap();
    assert_ne!(histories(&a), histories(&b));
    assert_eq!(a.seeds.chains[2], chain_seed(config.seed_policy.master_seed, 2));
    assert_eq!(a.seeds.exchange, exchange_seed(config.seed_policy.master_seed));
}

#[test]
fn explicit_seeds_override_the_master_seed() {
    let config = deterministic_config(ExecutionMode::Sequential);
    let seeds: [u64; 4] = [7, 8, 9, 10];
    let report = run(&config, &gaussian_model(), &starts(), Some(&seeds[..])).unwrap();
    assert_eq!(report.seeds.chains, seeds.to_vec());

    let err = run(&config, &gaussian_model(), &starts(), Some(&seeds[..3])).unwrap_err();
    assert_eq!(err.info().code, "seeds");
}

#[test]
fn every_iteration_adds_one_row_per_chain() {
    let config = deterministic_config(ExecutionMode::Parallel);
    let report = run(&config, &gaussian_model(), &starts(), None).unwrap();
    for index in 0..4 {
        let chain = report.chain(index).unwrap();
        assert_eq!(chain.history().len(), config.n_iter + 1);
        assert_eq!(chain.history()[0].point, starts()[index]);
        let best = chain
            .history()
            .iter()
            .map(|row| row.log_likelihood)
            .fold(f64::NEG_INFINITY, f64::max);
        assert_eq!(chain.max_log_likelihood(), best);
    }
}

#[test]
fn ladder_rounds_advance_the_epoch() {
    let config = deterministic_config(ExecutionMode::Parallel);
    let report = run(&config, &gaussian_model(), &starts(), None).unwrap();
    // Rounds at 10, 20, ..., 190.
    assert_eq!(report.ladder.epoch(), 19);
    assert_eq!(report.ladder.betas()[0], 1.0);
    assert_eq!(report.ladder.betas()[3], 1.0 / 20.0);
    for index in 0..4 {
        assert_eq!(report.chain(index).unwrap().beta(), report.ladder.betas()[index]);
    }

    let mut fixed = config.clone();
    fixed.adapt_ladder = false;
    let report = run(&fixed, &gaussian_model(), &starts(), None).unwrap();
    assert_eq!(report.ladder.epoch(), 0);
}

#[test]
fn swaps_are_skipped_when_disabled() {
    for tweak in [
        (|config: &mut RunConfig| config.p_swap = 0.0) as fn(&mut RunConfig),
        |config: &mut RunConfig| config.swap_start_iter = 10_000,
    ] {
        let mut config = deterministic_config(ExecutionMode::Parallel);
        tweak(&mut config);
        let report = run(&config, &gaussian_model(), &starts(), None).unwrap();
        assert!(report.is_success());
        for index in 0..4 {
            assert_eq!(report.chain(index).unwrap().swap_proposed(), 0);
        }
    }
}

#[test]
fn single_chain_runs_without_exchange() {
    let mut config = deterministic_config(ExecutionMode::Parallel);
    config.n_chains = 1;
    config.t_max = None;
    let report = run(&config, &gaussian_model(), &[vec![0.0, 0.0]], None).unwrap();
    assert!(report.is_success());
    assert_eq!(report.ladder.betas(), &[1.0]);
    let chain = report.coldest().unwrap();
    assert_eq!(chain.swap_proposed(), 0);
    assert_eq!(chain.history().len(), 201);
}
