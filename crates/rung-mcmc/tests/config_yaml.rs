use std::fs;

use rung_core::{ProposalKind, ProposalWeight};
use tempfile::tempdir;

use rung_mcmc::{ExecutionMode, RunConfig};

const FULL: &str = r#"
n_chains: 6
n_iter: 5000
p_swap: 0.25
swap_start_iter: 100
adapt_interval: 250
t_max: 40.0
ladder_adapt_interval: 20
print_interval: 500
checkpoint_dir: runs/demo
debug: true
proposals:
  - kind: gaussian
    weight: 2.0
  - kind: prior-draw
    weight: 1.0
execution:
  mode: sequential
  exchange_timeout_ms: 1500
seed_policy:
  master_seed: 42
  label: demo
resume:
  thin: 5
"#;

#[test]
fn yaml_overrides_land_in_the_config() {
    let config = RunConfig::from_yaml_str(FULL).unwrap();
    assert_eq!(config.n_chains, 6);
    assert_eq!(config.n_iter, 5000);
    assert_eq!(config.p_swap, 0.25);
    assert_eq!(config.swap_start_iter, 100);
    assert_eq!(config.t_max, Some(40.0));
    assert!(config.debug);
    assert_eq!(config.execution.mode, ExecutionMode::Sequential);
    assert_eq!(config.execution.exchange_timeout_ms, Some(1500));
    assert_eq!(config.execution.poll_interval_ms, 50);
    assert_eq!(config.seed_policy.master_seed, 42);
    assert_eq!(config.seed_policy.label.as_deref(), Some("demo"));
    assert_eq!(config.resume.thin, 5);
    assert_eq!(
        config.proposals,
        vec![
            ProposalWeight {
                kind: ProposalKind::Gaussian,
                weight: 2.0
            },
            ProposalWeight {
                kind: ProposalKind::PriorDraw,
                weight: 1.0
            },
        ]
    );
    config.validate(3).unwrap();
}

#[test]
fn empty_yaml_uses_defaults() {
    let config = RunConfig::from_yaml_str("{}").unwrap();
    assert_eq!(config, RunConfig::default());
    assert_eq!(config.n_chains, 4);
    assert_eq!(config.swap_start_iter, 2500);
    assert_eq!(config.execution.mode, ExecutionMode::Parallel);
    assert!(config.adapt_ladder);
}

#[test]
fn config_files_are_read_from_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("run.yaml");
    fs::write(&path, FULL).unwrap();
    assert_eq!(RunConfig::from_yaml_path(&path).unwrap().n_chains, 6);

    fs::write(&path, "n_chains: [oops").unwrap();
    let err = RunConfig::from_yaml_path(&path).unwrap_err();
    assert_eq!(err.info().code, "config-parse");
    assert!(err.info().context.contains_key("path"));

    let missing = RunConfig::from_yaml_path(&dir.path().join("absent.yaml")).unwrap_err();
    assert_eq!(missing.info().code, "config-read");
}

fn assert_rejected(code: &str, tweak: impl FnOnce(&mut RunConfig)) {
    let mut config = RunConfig::default();
    tweak(&mut config);
    let err = config.validate(2).unwrap_err();
    assert_eq!(err.family(), "invalid-config");
    assert_eq!(err.info().code, code);
}

#[test]
fn out_of_range_values_are_rejected() {
    assert_rejected("n-chains", |c| c.n_chains = 0);
    assert_rejected("p-swap", |c| c.p_swap = 1.5);
    assert_rejected("p-swap", |c| c.p_swap = f64::NAN);
    assert_rejected("adapt-interval", |c| c.adapt_interval = 0);
    assert_rejected("ladder-adapt-interval", |c| c.ladder_adapt_interval = 0);
    assert_rejected("ladder-adapt-t0", |c| c.ladder_adapt_t0 = 0.0);
    assert_rejected("ladder-adapt-nu", |c| c.ladder_adapt_nu = -1.0);
    assert_rejected("print-interval", |c| c.print_interval = 0);
    assert_rejected("t-max", |c| c.t_max = Some(0.5));
    assert_rejected("resume-thin", |c| c.resume.thin = 0);
    assert_rejected("poll-interval", |c| c.execution.poll_interval_ms = 0);
    assert_rejected("dim", |c| c.dim = Some(7));
    assert_rejected("proposal-weights", |c| c.proposals.clear());
    assert_eq!(RunConfig::default().validate(0).unwrap_err().info().code, "dim");
}

#[test]
fn round_schedule_follows_the_config() {
    let mut config = RunConfig::default();
    config.n_iter = 1000;
    config.swap_start_iter = 100;
    assert!(!config.swap_round_due(99));
    assert!(config.swap_round_due(100));
    assert!(!config.ladder_round_due(95));
    assert!(config.ladder_round_due(110));
    assert!(!config.ladder_round_due(115));

    config.n_chains = 1;
    assert!(!config.swap_round_due(500));
    assert!(!config.ladder_adapter_enabled());

    config.n_chains = 4;
    config.n_iter = 10;
    assert!(!config.ladder_adapter_enabled());
}
