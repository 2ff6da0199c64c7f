//! Builds chains and channels, runs the workers and collects their results.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crossbeam_channel::RecvTimeoutError;
use rung_core::{
    derive_substream_seed, ChainKernel, ErrorInfo, HistoryRow, Ladder, Model, PtError, RngHandle,
    Sample,
};
use tracing::{info, warn};

use crate::adapter::{adapt_round, ladder_channels, ladder_updates, LadderPort};
use crate::chain::ChainState;
use crate::checkpoint::{self, ChainStats};
use crate::config::{ExecutionMode, RunConfig};
use crate::determinism::RunSeeds;
use crate::exchange::{exchange_channels, resolve_round, SwapPort};
use crate::manifest::{self, RunManifest, MANIFEST_FILE};
use crate::metropolis::MetropolisKernel;
use crate::sync::{CancelToken, IoLock, LadderCell, WaitPolicy};
use crate::tempering::init_ladder;
use crate::worker::{
    adapt_chain, panic_message, report_chain, report_due, run_adaptation_hooks, step_chain,
    ChainStatus, ChainWorker,
};

/// Everything a run produced, including partial results of failed runs.
#[derive(Debug)]
pub struct RunReport {
    /// Final chain states; `None` for chains whose worker never returned.
    pub chains: Vec<Option<ChainState>>,
    /// Terminal status of every chain.
    pub statuses: Vec<ChainStatus>,
    /// Indices of failed chains.
    pub failed: Vec<usize>,
    /// Ladder at the end of the run.
    pub ladder: Ladder,
    /// Error raised by the swap coordinator, if any.
    pub coordinator_error: Option<PtError>,
    /// Error raised by the ladder adapter, if any.
    pub adapter_error: Option<PtError>,
    /// Seeds used by the run.
    pub seeds: RunSeeds,
    /// First iteration index of this run (non-zero after a resume).
    pub start_iteration: usize,
    /// Manifest written into the checkpoint directory, if any.
    pub manifest_path: Option<PathBuf>,
}

impl RunReport {
    /// True when every chain completed and no coordination task failed.
    pub fn is_success(&self) -> bool {
        self.statuses
            .iter()
            .all(|status| matches!(status, ChainStatus::Completed))
            && self.coordinator_error.is_none()
            && self.adapter_error.is_none()
    }

    /// State of chain `index`, if it was returned.
    pub fn chain(&self, index: usize) -> Option<&ChainState> {
        self.chains.get(index).and_then(Option::as_ref)
    }

    /// The beta = 1 chain.
    pub fn coldest(&self) -> Option<&ChainState> {
        self.chain(0)
    }
}

/// Runs the sampler with the reference [`MetropolisKernel`] on every chain.
pub fn run(
    config: &RunConfig,
    model: &Model,
    initial_points: &[Vec<f64>],
    seeds: Option<&[u64]>,
) -> Result<RunReport, PtError> {
    config.validate(model.dim())?;
    let kernels = reference_kernels(config, model)?;
    run_with_kernels(config, model, kernels, initial_points, seeds)
}

/// Runs the sampler with caller-supplied kernels, one per chain.
pub fn run_with_kernels(
    config: &RunConfig,
    model: &Model,
    kernels: Vec<Box<dyn ChainKernel>>,
    initial_points: &[Vec<f64>],
    seeds: Option<&[u64]>,
) -> Result<RunReport, PtError> {
    config.validate(model.dim())?;
    expect_per_chain(config, "kernels", kernels.len())?;
    expect_per_chain(config, "initial-points", initial_points.len())?;
    let (t_max, betas) = init_ladder(model.dim(), config.n_chains, config.t_max)?;
    let ladder = Ladder::new(betas, t_max)?;
    let seeds = RunSeeds::resolve(config.seed_policy.master_seed, config.n_chains, seeds)?;

    let mut chains = Vec::with_capacity(config.n_chains);
    for (index, (kernel, point)) in kernels.into_iter().zip(initial_points).enumerate() {
        let initial = model.evaluate(point.clone()).map_err(|err| with_chain(err, index))?;
        chains.push(ChainState::new(
            index,
            ladder.betas()[index],
            ladder.dbeta_above(index),
            initial,
            kernel,
            RngHandle::from_seed(seeds.chains[index]),
            config.debug,
        ));
    }
    execute(config, chains, ladder, seeds, 0)
}

/// Resumes from per-chain row files with the reference kernel.
pub fn resume(paths: &[PathBuf], config: &RunConfig, model: &Model) -> Result<RunReport, PtError> {
    config.validate(model.dim())?;
    let kernels = reference_kernels(config, model)?;
    resume_with_kernels(paths, config, model, kernels)
}

/// Resumes from per-chain row files with caller-supplied kernels.
///
/// Each file's rows become the chain's history (every `resume.thin`-th row),
/// the last kept row becomes the current state, and the rows are replayed
/// through the kernel with the adaptation hooks at their original cadence.
/// The run then continues for `n_iter` more iterations.
pub fn resume_with_kernels(
    paths: &[PathBuf],
    config: &RunConfig,
    model: &Model,
    kernels: Vec<Box<dyn ChainKernel>>,
) -> Result<RunReport, PtError> {
    config.validate(model.dim())?;
    expect_per_chain(config, "checkpoint-paths", paths.len())?;
    expect_per_chain(config, "kernels", kernels.len())?;
    let ladder = resume_ladder(paths, config, model.dim())?;

    let mut loaded = Vec::with_capacity(paths.len());
    let mut start = 0usize;
    for (index, path) in paths.iter().enumerate() {
        let rows = checkpoint::load_rows(path, model.dim())?;
        if rows.is_empty() {
            return Err(PtError::InvalidConfig(
                ErrorInfo::new("checkpoint-empty", "checkpoint holds no rows")
                    .with_context("chain", index)
                    .with_context("path", path.display()),
            ));
        }
        start = start.max(rows.len() - 1);
        let raw_rows = rows.len();
        let samples: Vec<Sample> = rows
            .into_iter()
            .step_by(config.resume.thin)
            .map(|row| {
                let log_likelihood = row
                    .log_likelihood
                    .unwrap_or_else(|| model.log_likelihood(&row.point));
                let log_prior = model.log_prior(&row.point);
                Sample::new(row.point, log_likelihood, log_prior)
            })
            .collect();
        loaded.push((samples, raw_rows));
    }

    let seeds = RunSeeds::resolve(
        derive_substream_seed(config.seed_policy.master_seed, start as u64),
        config.n_chains,
        None,
    )?;
    let mut chains = Vec::with_capacity(config.n_chains);
    for (index, (mut kernel, (samples, raw_rows))) in kernels.into_iter().zip(loaded).enumerate()
    {
        let beta = ladder.betas()[index];
        let history: Vec<HistoryRow> = samples.iter().map(HistoryRow::from).collect();
        for (row, sample) in samples.iter().enumerate() {
            kernel.accept_history(sample);
            for iteration in replayed_iterations(row, config.resume.thin, raw_rows) {
                run_adaptation_hooks(
                    kernel.as_mut(),
                    &history[..=row],
                    index,
                    iteration,
                    1.0 / beta,
                    config,
                )?;
            }
        }
        let current = samples.last().cloned().ok_or_else(|| {
            PtError::invalid_config("checkpoint-empty", "no rows after thinning")
        })?;
        info!(chain = index, rows = history.len(), "chain resumed");
        let mut chain = ChainState::from_history(
            index,
            beta,
            ladder.dbeta_above(index),
            current,
            history,
            kernel,
            RngHandle::from_seed(seeds.chains[index]),
            config.debug,
        );
        if let Some(stats) = stored_stats(&paths[index], index) {
            chain.restore_swap_counters(stats.n_swap_accepted, stats.n_swap_proposed);
        }
        chains.push(chain);
    }
    execute(config, chains, ladder, seeds, start)
}

/// Original iterations whose newest stored row is kept row `row`.
///
/// Stored row `r` was recorded at iteration `r - 1`, and with thinning kept
/// row `row` is stored row `row * thin`.
fn replayed_iterations(row: usize, thin: usize, raw_rows: usize) -> Range<usize> {
    let first = (row * thin).saturating_sub(1);
    let end = ((row + 1) * thin - 1).min(raw_rows.saturating_sub(1));
    first.min(end)..end
}

/// Statistics record stored next to a chain's row file, if one is readable.
fn stored_stats(path: &Path, index: usize) -> Option<ChainStats> {
    let stats_path = checkpoint::stats_path(path.parent()?, index);
    if !stats_path.is_file() {
        return None;
    }
    match ChainStats::load(&stats_path) {
        Ok(stats) => Some(stats),
        Err(err) => {
            warn!(chain = index, error = %err, "ignoring unreadable stats record");
            None
        }
    }
}

fn reference_kernels(
    config: &RunConfig,
    model: &Model,
) -> Result<Vec<Box<dyn ChainKernel>>, PtError> {
    let table = config.proposal_table()?;
    Ok((0..config.n_chains)
        .map(|_| {
            Box::new(MetropolisKernel::new(model.clone(), table.clone())) as Box<dyn ChainKernel>
        })
        .collect())
}

fn expect_per_chain(config: &RunConfig, what: &str, found: usize) -> Result<(), PtError> {
    if found != config.n_chains {
        return Err(PtError::InvalidConfig(
            ErrorInfo::new(what, "one entry per chain is required")
                .with_context("expected", config.n_chains)
                .with_context("found", found),
        ));
    }
    Ok(())
}

fn with_chain(err: PtError, index: usize) -> PtError {
    match err {
        PtError::InvalidConfig(info) => PtError::InvalidConfig(info.with_context("chain", index)),
        other => other,
    }
}

/// Ladder of a resumed run: the manifest's final ladder when one sits next
/// to the row files, a fresh ladder otherwise.
fn resume_ladder(paths: &[PathBuf], config: &RunConfig, dim: usize) -> Result<Ladder, PtError> {
    let manifest_path = paths
        .first()
        .and_then(|path| path.parent())
        .map(|dir| dir.join(MANIFEST_FILE))
        .filter(|path| path.is_file());
    if let Some(path) = manifest_path {
        match RunManifest::load(&path) {
            Ok(manifest) if manifest.final_betas.len() == config.n_chains => {
                let stored =
                    Ladder::with_epoch(manifest.final_betas, manifest.t_max, manifest.ladder_epoch);
                match stored {
                    Ok(ladder) => return Ok(ladder),
                    Err(err) => warn!(error = %err, "ignoring stored ladder"),
                }
            }
            Ok(_) => warn!(path = %path.display(), "stored ladder has a different chain count"),
            Err(err) => warn!(error = %err, "ignoring unreadable manifest"),
        }
    }
    let (t_max, betas) = init_ladder(dim, config.n_chains, config.t_max)?;
    Ladder::new(betas, t_max)
}

struct Outcome {
    chains: Vec<Option<ChainState>>,
    statuses: Vec<ChainStatus>,
    ladder: Ladder,
    coordinator_error: Option<PtError>,
    adapter_error: Option<PtError>,
}

fn execute(
    config: &RunConfig,
    chains: Vec<ChainState>,
    ladder: Ladder,
    seeds: RunSeeds,
    start: usize,
) -> Result<RunReport, PtError> {
    info!(
        n_chains = config.n_chains,
        n_iter = config.n_iter,
        start,
        t_max = ladder.t_max(),
        mode = ?config.execution.mode,
        "starting tempering run"
    );
    let outcome = match config.execution.mode {
        ExecutionMode::Parallel => execute_parallel(config, chains, ladder, &seeds, start)?,
        ExecutionMode::Sequential => execute_sequential(config, chains, ladder, &seeds, start),
    };
    let Outcome {
        mut chains,
        statuses,
        ladder,
        coordinator_error,
        adapter_error,
    } = outcome;

    let io = IoLock::new();
    if let Some(dir) = &config.checkpoint_dir {
        for (chain, status) in chains.iter_mut().zip(&statuses) {
            // Completed chains saved at their last iteration unless there was none.
            if config.n_iter > 0 && matches!(status, ChainStatus::Completed) {
                continue;
            }
            if let Some(chain) = chain.as_mut() {
                let _guard = io.lock();
                if let Err(err) = checkpoint::save(chain, dir) {
                    warn!(chain = chain.index(), error = %err, "final checkpoint failed");
                }
            }
        }
    }

    let manifest_path = match &config.checkpoint_dir {
        Some(dir) => write_manifest(config, dir, &seeds, &ladder, &statuses),
        None => None,
    };

    let failed: Vec<usize> = statuses
        .iter()
        .enumerate()
        .filter(|(_, status)| status.is_failed())
        .map(|(index, _)| index)
        .collect();
    if failed.is_empty() {
        info!(epoch = ladder.epoch(), "tempering run finished");
    } else {
        warn!(failed = ?failed, "tempering run finished with failed chains");
    }
    Ok(RunReport {
        chains,
        statuses,
        failed,
        ladder,
        coordinator_error,
        adapter_error,
        seeds,
        start_iteration: start,
        manifest_path,
    })
}

fn write_manifest(
    config: &RunConfig,
    dir: &Path,
    seeds: &RunSeeds,
    ladder: &Ladder,
    statuses: &[ChainStatus],
) -> Option<PathBuf> {
    let path = dir.join(MANIFEST_FILE);
    let written = manifest::config_hash(config).and_then(|config_hash| {
        RunManifest {
            config: config.clone(),
            config_hash,
            master_seed: config.seed_policy.master_seed,
            seed_label: config.seed_policy.label.clone(),
            seeds: seeds.clone(),
            t_max: ladder.t_max(),
            final_betas: ladder.betas().to_vec(),
            ladder_epoch: ladder.epoch(),
            statuses: statuses.to_vec(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
        .write(&path)
    });
    match written {
        Ok(()) => Some(path),
        Err(err) => {
            warn!(error = %err, "manifest not written");
            None
        }
    }
}

struct WorkerExit {
    index: usize,
    chain: ChainState,
    status: ChainStatus,
}

fn execute_parallel(
    config: &RunConfig,
    chains: Vec<ChainState>,
    ladder: Ladder,
    seeds: &RunSeeds,
    start: usize,
) -> Result<Outcome, PtError> {
    let n_chains = chains.len();
    let end = start + config.n_iter;
    let shared = Arc::new(config.clone());
    let cancel = CancelToken::new();
    let wait = WaitPolicy {
        cancel: cancel.clone(),
        poll_interval: config.execution.poll_interval(),
        timeout: config.execution.exchange_timeout(),
    };
    let grace = config.execution.grace_period();
    let cell = Arc::new(LadderCell::new(ladder));
    let io = IoLock::new();

    let swap_rounds: Vec<usize> = (start..end).filter(|&it| config.swap_round_due(it)).collect();
    let (coordinator, swap_ports) = if swap_rounds.is_empty() {
        (None, Vec::new())
    } else {
        let (coordinator, ports) =
            exchange_channels(n_chains, config.p_swap, RngHandle::from_seed(seeds.exchange));
        (Some(coordinator), ports)
    };

    let ladder_rounds: Vec<usize> = (start..end)
        .filter(|&it| config.ladder_round_due(it))
        .collect();
    let (adapter_rx, ladder_ports) = if ladder_rounds.is_empty() {
        (None, Vec::new())
    } else {
        let (adapter, ports) = ladder_channels(
            n_chains,
            Arc::clone(&cell),
            config.ladder_adapt_t0,
            config.ladder_adapt_nu,
        );
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let adapter_wait = wait.clone();
        thread::Builder::new()
            .name("rung-ladder-adapter".to_string())
            .spawn(move || {
                let result = adapter.serve(ladder_rounds, &adapter_wait);
                if let Err(err) = &result {
                    if !err.is_cancellation() {
                        warn!(error = %err, "ladder adapter failed");
                    }
                }
                let _ = done_tx.send(result);
            })
            .map_err(|err| PtError::Io(ErrorInfo::new("spawn-adapter", err.to_string())))?;
        (Some(done_rx), ports)
    };

    let (exit_tx, exit_rx) = crossbeam_channel::unbounded::<WorkerExit>();
    let mut statuses: Vec<Option<ChainStatus>> = (0..n_chains).map(|_| None).collect();
    let mut handles = Vec::with_capacity(n_chains);
    let mut swap_ports: Vec<Option<SwapPort>> = swap_ports.into_iter().map(Some).collect();
    let mut ladder_ports: Vec<Option<LadderPort>> = ladder_ports.into_iter().map(Some).collect();
    for chain in chains {
        let index = chain.index();
        let worker = ChainWorker {
            chain,
            config: Arc::clone(&shared),
            iterations: start..end,
            swap: swap_ports.get_mut(index).and_then(Option::take),
            ladder: ladder_ports.get_mut(index).and_then(Option::take),
            cell: Arc::clone(&cell),
            io: io.clone(),
            wait: wait.clone(),
        };
        let tx = exit_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("rung-chain-{index}"))
            .spawn(move || {
                let (chain, status) = worker.run();
                let _ = tx.send(WorkerExit {
                    index,
                    chain,
                    status,
                });
            });
        match spawned {
            Ok(handle) => handles.push((index, handle)),
            Err(err) => {
                cancel.cancel();
                statuses[index] = Some(ChainStatus::Failed {
                    error: PtError::Io(
                        ErrorInfo::new("spawn-worker", err.to_string())
                            .with_context("chain", index),
                    ),
                });
            }
        }
    }
    drop(exit_tx);
    drop(swap_ports);
    drop(ladder_ports);

    let coordinator_error = coordinator.and_then(|coordinator| {
        match coordinator.serve(swap_rounds, &wait) {
            Ok(()) => None,
            Err(err) => {
                if !err.is_cancellation() {
                    warn!(error = %err, "exchange coordinator failed");
                }
                Some(err)
            }
        }
    });

    let mut chains: Vec<Option<ChainState>> = (0..n_chains).map(|_| None).collect();
    let mut pending = handles.len();
    let mut deadline: Option<Instant> = None;
    while pending > 0 {
        match exit_rx.recv_timeout(wait.poll_interval) {
            Ok(exit) => {
                statuses[exit.index] = Some(exit.status);
                chains[exit.index] = Some(exit.chain);
                pending -= 1;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
        let others_done = pending == 1 && handles.len() > 1;
        if deadline.is_none() && (cancel.is_cancelled() || others_done) {
            deadline = Some(Instant::now() + grace);
        }
        if deadline.is_some_and(|limit| Instant::now() >= limit) {
            break;
        }
    }

    for (index, handle) in handles {
        if chains[index].is_some() {
            let _ = handle.join();
        } else if handle.is_finished() {
            if let Err(payload) = handle.join() {
                cancel.cancel();
                statuses[index] = Some(ChainStatus::Failed {
                    error: PtError::WorkerFailure(
                        ErrorInfo::new("worker-panic", panic_message(payload.as_ref()))
                            .with_context("chain", index),
                    ),
                });
            }
        } else {
            warn!(chain = index, "worker did not stop within the grace period");
        }
    }
    let statuses: Vec<ChainStatus> = statuses
        .into_iter()
        .enumerate()
        .map(|(index, status)| {
            status.unwrap_or_else(|| {
                cancel.cancel();
                ChainStatus::Failed {
                    error: PtError::Timeout(
                        ErrorInfo::new("straggler", "worker still running after the grace period")
                            .with_context("chain", index)
                            .with_context("grace_ms", grace.as_millis()),
                    ),
                }
            })
        })
        .collect();

    let adapter_error = adapter_rx.and_then(|rx| match rx.recv_timeout(grace) {
        Ok(Ok(())) => None,
        Ok(Err(err)) => Some(err),
        Err(_) => {
            cancel.cancel();
            Some(PtError::Timeout(ErrorInfo::new(
                "straggler",
                "ladder adapter still running after the grace period",
            )))
        }
    });

    Ok(Outcome {
        chains,
        statuses,
        ladder: (*cell.load()).clone(),
        coordinator_error,
        adapter_error,
    })
}

fn execute_sequential(
    config: &RunConfig,
    mut chains: Vec<ChainState>,
    mut ladder: Ladder,
    seeds: &RunSeeds,
    start: usize,
) -> Outcome {
    let end = start + config.n_iter;
    let mut rng = RngHandle::from_seed(seeds.exchange);
    let io = IoLock::new();
    let mut failure: Option<(Option<usize>, usize, PtError)> = None;

    'iterations: for iteration in start..end {
        for chain in chains.iter_mut() {
            let stepped = step_chain(chain, iteration, &ladder)
                .and_then(|()| adapt_chain(chain, iteration, config));
            if let Err(err) = stepped {
                failure = Some((Some(chain.index()), iteration, err));
                break 'iterations;
            }
        }

        if config.swap_round_due(iteration) {
            let betas: Vec<f64> = chains.iter().map(ChainState::beta).collect();
            let samples: Vec<Sample> = chains.iter().map(|chain| chain.current().clone()).collect();
            let resolution = resolve_round(iteration, &betas, samples, config.p_swap, &mut rng);
            let outcomes = resolution.into_outcomes(iteration);
            for (chain, outcome) in chains.iter_mut().zip(outcomes) {
                chain.apply_swap(outcome, iteration);
            }
        }

        if config.ladder_round_due(iteration) {
            let tallies: Vec<_> = chains.iter().map(ChainState::upper_pair).collect();
            match adapt_round(
                &ladder,
                &tallies,
                iteration,
                config.ladder_adapt_t0,
                config.ladder_adapt_nu,
            ) {
                Ok(next) => {
                    for (chain, update) in chains.iter_mut().zip(ladder_updates(&next, iteration)) {
                        chain.set_ladder_position(update.beta, update.dbeta_above);
                    }
                    ladder = next;
                }
                Err(err) => {
                    failure = Some((None, iteration, err));
                    break 'iterations;
                }
            }
        }

        for chain in chains.iter_mut() {
            chain.trace_iteration();
        }
        if report_due(iteration, end, config) {
            for chain in chains.iter_mut() {
                if let Err(err) = report_chain(chain, iteration, config, &io) {
                    failure = Some((Some(chain.index()), iteration, err));
                    break 'iterations;
                }
            }
        }
    }

    let mut adapter_error = None;
    let statuses = match failure {
        None => vec![ChainStatus::Completed; chains.len()],
        Some((culprit, iteration, err)) => {
            warn!(iteration, error = %err, "sequential run stopped");
            let statuses = (0..chains.len())
                .map(|index| {
                    if culprit == Some(index) {
                        ChainStatus::Failed { error: err.clone() }
                    } else {
                        ChainStatus::Cancelled { iteration }
                    }
                })
                .collect();
            if culprit.is_none() {
                adapter_error = Some(err);
            }
            statuses
        }
    };
    Outcome {
        chains: chains.into_iter().map(Some).collect(),
        statuses,
        ladder,
        coordinator_error: None,
        adapter_error,
    }
}
