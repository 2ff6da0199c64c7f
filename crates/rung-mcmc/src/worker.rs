//! Per-chain loop: step, local adaptation, swap round, ladder round, report.

use std::any::Any;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use rung_core::{ChainKernel, ErrorInfo, HistoryRow, Ladder, PtError, StepContext};
use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn};

use crate::adapter::{LadderPort, LadderReport};
use crate::chain::ChainState;
use crate::checkpoint;
use crate::config::RunConfig;
use crate::exchange::{SwapOffer, SwapPort};
use crate::sync::{IoLock, LadderCell, WaitPolicy};

/// Interval between density-estimate rebuilds.
pub const DENSITY_INTERVAL: usize = 5000;

/// Hottest temperature at which mixture modes are still tracked.
pub const MODE_TEMPERATURE_LIMIT: f64 = 10.0;

/// Terminal state of a chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum ChainStatus {
    /// All iterations ran.
    Completed,
    /// The chain stopped on its own error.
    Failed {
        /// Cause of the failure.
        error: PtError,
    },
    /// The chain stopped because another task failed.
    Cancelled {
        /// Iteration at which the chain stopped.
        iteration: usize,
    },
}

impl ChainStatus {
    /// True for [`ChainStatus::Failed`].
    pub fn is_failed(&self) -> bool {
        matches!(self, ChainStatus::Failed { .. })
    }
}

/// Runs one kernel operation, turning errors and panics into `WorkerFailure`.
fn guarded<T>(
    chain: usize,
    iteration: usize,
    operation: &str,
    f: impl FnOnce() -> Result<T, PtError>,
) -> Result<T, PtError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(PtError::WorkerFailure(
            err.info()
                .clone()
                .with_context("family", err.family())
                .with_context("chain", chain)
                .with_context("iteration", iteration)
                .with_context("operation", operation),
        )),
        Err(payload) => Err(PtError::WorkerFailure(
            ErrorInfo::new("kernel-panic", panic_message(payload.as_ref()))
                .with_context("chain", chain)
                .with_context("iteration", iteration)
                .with_context("operation", operation),
        )),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "kernel panicked".to_string()
    }
}

/// Advances a chain by one kernel step and records the new row.
pub(crate) fn step_chain(
    chain: &mut ChainState,
    iteration: usize,
    ladder: &Ladder,
) -> Result<(), PtError> {
    let index = chain.index();
    let ctx = StepContext {
        iteration,
        chain: index,
        beta: chain.beta(),
        ladder,
    };
    let current = chain.current().clone();
    let (kernel, rng) = chain.kernel_and_rng();
    let outcome = guarded(index, iteration, "full-step", || {
        kernel.full_step(&ctx, &current, rng)
    })?;
    chain.set_current(outcome.sample);
    chain.push_current();
    Ok(())
}

/// Calls the local adaptation hooks due at `iteration`.
///
/// Covariance every `adapt_interval` iterations; modes on the same cadence
/// for chains no hotter than [`MODE_TEMPERATURE_LIMIT`] once ten adaptation
/// intervals have passed; the density estimate every [`DENSITY_INTERVAL`].
pub(crate) fn run_adaptation_hooks(
    kernel: &mut dyn ChainKernel,
    history: &[HistoryRow],
    chain: usize,
    iteration: usize,
    temperature: f64,
    config: &RunConfig,
) -> Result<(), PtError> {
    if iteration == 0 {
        return Ok(());
    }
    if iteration % config.adapt_interval == 0 {
        guarded(chain, iteration, "update-covariance", || {
            kernel.update_covariance(history)
        })?;
        if temperature <= MODE_TEMPERATURE_LIMIT && iteration >= 10 * config.adapt_interval {
            guarded(chain, iteration, "update-modes", || kernel.update_modes(history))?;
        }
    }
    if iteration % DENSITY_INTERVAL == 0 {
        guarded(chain, iteration, "update-density-estimate", || {
            kernel.update_density_estimate(history)
        })?;
    }
    Ok(())
}

pub(crate) fn adapt_chain(
    chain: &mut ChainState,
    iteration: usize,
    config: &RunConfig,
) -> Result<(), PtError> {
    let index = chain.index();
    let temperature = chain.temperature();
    let (kernel, history) = chain.kernel_with_history();
    run_adaptation_hooks(kernel, history, index, iteration, temperature, config)
}

/// True when progress is reported (and checkpoints written) at `iteration`.
pub(crate) fn report_due(iteration: usize, end: usize, config: &RunConfig) -> bool {
    iteration % config.print_interval == 0 || iteration + 1 == end
}

/// Emits a progress line and writes the checkpoint, under the I/O lock.
pub(crate) fn report_chain(
    chain: &mut ChainState,
    iteration: usize,
    config: &RunConfig,
    io: &IoLock,
) -> Result<(), PtError> {
    let _guard = io.lock();
    info!(
        chain = chain.index(),
        iteration,
        log_likelihood = chain.current().log_likelihood,
        best = chain.max_log_likelihood(),
        temperature = chain.temperature(),
        swap_ratio = chain.swap_acceptance_ratio(),
        "progress"
    );
    if let Some(dir) = &config.checkpoint_dir {
        checkpoint::save(chain, dir)?;
    }
    Ok(())
}

/// A chain running on its own thread.
pub struct ChainWorker {
    pub(crate) chain: ChainState,
    pub(crate) config: Arc<RunConfig>,
    pub(crate) iterations: Range<usize>,
    pub(crate) swap: Option<SwapPort>,
    pub(crate) ladder: Option<LadderPort>,
    pub(crate) cell: Arc<LadderCell>,
    pub(crate) io: IoLock,
    pub(crate) wait: WaitPolicy,
}

impl ChainWorker {
    /// Runs every iteration and returns the chain with its terminal status.
    ///
    /// A failure of this chain trips the shared cancellation token.
    pub fn run(mut self) -> (ChainState, ChainStatus) {
        let span = info_span!("chain", index = self.chain.index());
        let _enter = span.enter();
        let status = match self.drive() {
            Ok(()) => ChainStatus::Completed,
            Err((iteration, err)) if err.is_cancellation() => {
                info!(iteration, "chain cancelled");
                ChainStatus::Cancelled { iteration }
            }
            Err((iteration, err)) => {
                warn!(iteration, error = %err, "chain failed");
                self.wait.cancel.cancel();
                ChainStatus::Failed { error: err }
            }
        };
        (self.chain, status)
    }

    fn drive(&mut self) -> Result<(), (usize, PtError)> {
        let end = self.iterations.end;
        let task = format!("chain-{}", self.chain.index());
        for iteration in self.iterations.clone() {
            self.iterate(iteration, end, &task)
                .map_err(|err| (iteration, err))?;
        }
        Ok(())
    }

    fn iterate(&mut self, iteration: usize, end: usize, task: &str) -> Result<(), PtError> {
        self.wait.cancel.check(task)?;
        let ladder = self.cell.load();
        step_chain(&mut self.chain, iteration, &ladder)?;
        adapt_chain(&mut self.chain, iteration, &self.config)?;

        if self.config.swap_round_due(iteration) {
            if let Some(port) = &self.swap {
                let offer = SwapOffer {
                    chain: self.chain.index(),
                    iteration,
                    beta: self.chain.beta(),
                    sample: self.chain.current().clone(),
                };
                let outcome = port.exchange(offer, &self.wait)?;
                self.chain.apply_swap(outcome, iteration);
            }
        }

        if self.config.ladder_round_due(iteration) {
            if let Some(port) = &self.ladder {
                let report = LadderReport {
                    chain: self.chain.index(),
                    iteration,
                    beta: self.chain.beta(),
                    swap_accepted: self.chain.swap_accepted(),
                    swap_proposed: self.chain.swap_proposed(),
                    upper_pair: self.chain.upper_pair(),
                };
                let update = port.sync(report, &self.wait)?;
                self.chain.set_ladder_position(update.beta, update.dbeta_above);
            }
        }

        self.chain.trace_iteration();
        if report_due(iteration, end, &self.config) {
            report_chain(&mut self.chain, iteration, &self.config, &self.io)?;
        }
        Ok(())
    }
}
