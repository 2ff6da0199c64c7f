use std::thread;
use std::time::Duration;

use rung_core::{
    ChainKernel, ErrorInfo, HistoryRow, Model, ParamPrior, ProposalKind, PtError, RngHandle,
    Sample, StepContext, StepOutcome,
};
use tempfile::tempdir;

use rung_mcmc::checkpoint;
use rung_mcmc::{run_with_kernels, ChainStatus, ExecutionMode, RunConfig, RunReport};

#[derive(Clone, Copy)]
enum Fault {
    None,
    StepError { at: usize },
    StepPanic { at: usize },
    CovarianceError,
    Stall { at: usize, millis: u64 },
}

struct FaultyKernel {
    fault: Fault,
}

impl ChainKernel for FaultyKernel {
    fn full_step(
        &mut self,
        ctx: &StepContext<'_>,
        current: &Sample,
        rng: &mut RngHandle,
    ) -> Result<StepOutcome, PtError> {
        match self.fault {
            Fault::StepError { at } if ctx.iteration == at => {
                return Err(PtError::InvalidConfig(ErrorInfo::new(
                    "bad-step",
                    "likelihood blew up",
                )));
            }
            Fault::StepPanic { at } if ctx.iteration == at => panic!("kernel exploded"),
            Fault::Stall { at, millis } if ctx.iteration == at => {
                thread::sleep(Duration::from_millis(millis));
            }
            _ => {}
        }
        let mut point = current.point.clone();
        point[0] += rng.uniform() - 0.5;
        let log_likelihood = -0.5 * point[0] * point[0];
        Ok(StepOutcome {
            sample: Sample::new(point, log_likelihood, 0.0),
            kind: ProposalKind::Gaussian,
            accepted: true,
        })
    }

    fn update_covariance(&mut self, _history: &[HistoryRow]) -> Result<(), PtError> {
        match self.fault {
            Fault::CovarianceError => Err(PtError::invalid_config("singular", "no spread")),
            _ => Ok(()),
        }
    }
}

fn model() -> Model {
    Model::with_uniform_prior(vec![ParamPrior::new("x", -100.0, 100.0)], |x: &[f64]| {
        -0.5 * x[0] * x[0]
    })
    .unwrap()
}

fn config(mode: ExecutionMode) -> RunConfig {
    let mut config = RunConfig::default();
    config.n_chains = 3;
    config.n_iter = 200;
    config.t_max = Some(5.0);
    config.swap_start_iter = 0;
    config.adapt_interval = 20;
    config.execution.mode = mode;
    config.execution.poll_interval_ms = 5;
    config
}

fn run_with_fault(config: &RunConfig, faulty: usize, fault: Fault) -> RunReport {
    let kernels: Vec<Box<dyn ChainKernel>> = (0..config.n_chains)
        .map(|index| {
            let fault = if index == faulty { fault } else { Fault::None };
            Box::new(FaultyKernel { fault }) as Box<dyn ChainKernel>
        })
        .collect();
    let starts = vec![vec![0.0]; config.n_chains];
    run_with_kernels(config, &model(), kernels, &starts, None).unwrap()
}

fn failure_of(report: &RunReport, index: usize) -> &PtError {
    match &report.statuses[index] {
        ChainStatus::Failed { error } => error,
        other => panic!("chain {index} ended as {other:?}"),
    }
}

#[test]
fn kernel_error_fails_its_chain_and_cancels_the_rest() {
    for mode in [ExecutionMode::Parallel, ExecutionMode::Sequential] {
        let report = run_with_fault(&config(mode), 1, Fault::StepError { at: 5 });
        assert!(!report.is_success());
        assert_eq!(report.failed, vec![1]);

        let error = failure_of(&report, 1);
        assert_eq!(error.family(), "worker-failure");
        let info = error.info();
        assert_eq!(info.code, "bad-step");
        assert_eq!(info.context.get("chain").map(String::as_str), Some("1"));
        assert_eq!(info.context.get("iteration").map(String::as_str), Some("5"));
        assert_eq!(info.context.get("operation").map(String::as_str), Some("full-step"));
        assert_eq!(info.context.get("family").map(String::as_str), Some("invalid-config"));

        for index in [0, 2] {
            assert_eq!(report.statuses[index], ChainStatus::Cancelled { iteration: 5 });
            let rows = report.chain(index).unwrap().history().len();
            assert!((6..=7).contains(&rows), "chain {index} kept {rows} rows");
        }
        assert_eq!(report.chain(1).unwrap().history().len(), 6);
    }
}

#[test]
fn kernel_panic_is_contained() {
    let report = run_with_fault(&config(ExecutionMode::Parallel), 0, Fault::StepPanic { at: 12 });
    assert_eq!(report.failed, vec![0]);
    let info = failure_of(&report, 0).info();
    assert_eq!(info.code, "kernel-panic");
    assert_eq!(info.message, "kernel exploded");
    for index in [1, 2] {
        assert_eq!(report.statuses[index], ChainStatus::Cancelled { iteration: 12 });
    }
}

#[test]
fn adaptation_hook_failures_name_the_hook() {
    let report = run_with_fault(&config(ExecutionMode::Sequential), 2, Fault::CovarianceError);
    let info = failure_of(&report, 2).info();
    assert_eq!(info.code, "singular");
    assert_eq!(
        info.context.get("operation").map(String::as_str),
        Some("update-covariance")
    );
    assert_eq!(info.context.get("iteration").map(String::as_str), Some("20"));
}

#[test]
fn partial_histories_are_flushed_on_failure() {
    let dir = tempdir().unwrap();
    let mut config = config(ExecutionMode::Parallel);
    config.checkpoint_dir = Some(dir.path().to_path_buf());
    let report = run_with_fault(&config, 2, Fault::StepError { at: 33 });
    assert_eq!(report.failed, vec![2]);

    for index in 0..3 {
        let rows = checkpoint::load_rows(&checkpoint::rows_path(dir.path(), index), 1).unwrap();
        assert_eq!(rows.len(), report.chain(index).unwrap().history().len());
    }
    assert!(report.manifest_path.is_some());
}

#[test]
fn stalled_peer_trips_the_exchange_timeout() {
    let mut config = config(ExecutionMode::Parallel);
    config.n_iter = 20;
    config.execution.exchange_timeout_ms = Some(50);
    config.execution.grace_period_ms = 2_000;
    let report = run_with_fault(&config, 2, Fault::Stall { at: 3, millis: 400 });

    assert!(!report.is_success());
    assert!(report
        .statuses
        .iter()
        .all(|status| !matches!(status, ChainStatus::Completed)));
    let timed_out = report
        .coordinator_error
        .iter()
        .chain(report.statuses.iter().filter_map(|status| match status {
            ChainStatus::Failed { error } => Some(error),
            _ => None,
        }))
        .any(|error| error.family() == "timeout");
    assert!(timed_out);
}
