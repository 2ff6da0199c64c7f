//! Ladder adaptation rounds: gather from every chain, recompute, broadcast.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use rung_core::{ErrorInfo, Ladder, PtError};
use tracing::{debug, info};

use crate::chain::SwapTally;
use crate::sync::{LadderCell, WaitPolicy};
use crate::tempering::{adapt_ladder, adaptation_rate};

/// Swap statistics a chain contributes to a ladder round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LadderReport {
    /// Reporting chain.
    pub chain: usize,
    /// Iteration the round belongs to.
    pub iteration: usize,
    /// Current inverse temperature of the chain.
    pub beta: f64,
    /// Lifetime accepted swaps.
    pub swap_accepted: u64,
    /// Lifetime proposed swaps.
    pub swap_proposed: u64,
    /// Tally of the pair with the next-hotter chain.
    pub upper_pair: SwapTally,
}

/// New ladder position broadcast to one chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LadderUpdate {
    /// Iteration the round belongs to.
    pub iteration: usize,
    /// New inverse temperature.
    pub beta: f64,
    /// New gap to the next-hotter rung.
    pub dbeta_above: f64,
    /// Epoch of the published ladder.
    pub epoch: u64,
}

/// Computes the next ladder from the per-pair tallies of a round.
///
/// `tallies[i]` is the upper-pair tally of chain `i`; the hottest chain's
/// entry is ignored.
pub fn adapt_round(
    ladder: &Ladder,
    tallies: &[SwapTally],
    iteration: usize,
    t0: f64,
    nu: f64,
) -> Result<Ladder, PtError> {
    let pairs = ladder.len().saturating_sub(1);
    let ratios: Vec<f64> = tallies.iter().take(pairs).map(SwapTally::ratio).collect();
    let kappa = adaptation_rate(iteration, t0, nu);
    let betas = adapt_ladder(ladder.betas(), ladder.t_max(), &ratios, kappa);
    Ladder::with_epoch(betas, ladder.t_max(), ladder.epoch() + 1).map_err(|err| {
        PtError::WorkerFailure(
            ErrorInfo::new("ladder-adapt", "adapted ladder failed validation")
                .with_context("iteration", iteration)
                .with_context("cause", err),
        )
    })
}

/// Per-chain `(beta, dbeta_above)` pairs of a ladder.
pub fn ladder_updates(ladder: &Ladder, iteration: usize) -> Vec<LadderUpdate> {
    (0..ladder.len())
        .map(|chain| LadderUpdate {
            iteration,
            beta: ladder.betas()[chain],
            dbeta_above: ladder.dbeta_above(chain),
            epoch: ladder.epoch(),
        })
        .collect()
}

/// Worker-side endpoints for ladder rounds.
#[derive(Debug)]
pub struct LadderPort {
    chain: usize,
    reports: Sender<LadderReport>,
    updates: Receiver<LadderUpdate>,
}

impl LadderPort {
    /// Sends the chain's statistics and waits for its new ladder position.
    pub fn sync(&self, report: LadderReport, wait: &WaitPolicy) -> Result<LadderUpdate, PtError> {
        let task = format!("chain-{}", self.chain);
        let iteration = report.iteration;
        wait.send(&self.reports, report, &task, "ladder-adapter")?;
        let update = wait.recv(&self.updates, &task, "ladder-adapter")?;
        if update.iteration != iteration {
            return Err(PtError::WorkerFailure(
                ErrorInfo::new("ladder-desync", "ladder round iteration mismatch")
                    .with_context("chain", self.chain)
                    .with_context("expected", iteration)
                    .with_context("found", update.iteration),
            ));
        }
        Ok(update)
    }
}

/// The adapter task: owns the gather receivers and broadcast senders.
#[derive(Debug)]
pub struct LadderAdapter {
    reports: Vec<Receiver<LadderReport>>,
    updates: Vec<Sender<LadderUpdate>>,
    cell: Arc<LadderCell>,
    t0: f64,
    nu: f64,
}

/// Builds the adapter and one port per chain.
pub fn ladder_channels(
    n_chains: usize,
    cell: Arc<LadderCell>,
    t0: f64,
    nu: f64,
) -> (LadderAdapter, Vec<LadderPort>) {
    let mut report_rxs = Vec::with_capacity(n_chains);
    let mut update_txs = Vec::with_capacity(n_chains);
    let mut ports = Vec::with_capacity(n_chains);
    for chain in 0..n_chains {
        let (report_tx, report_rx) = crossbeam_channel::unbounded();
        let (update_tx, update_rx) = crossbeam_channel::unbounded();
        report_rxs.push(report_rx);
        update_txs.push(update_tx);
        ports.push(LadderPort {
            chain,
            reports: report_tx,
            updates: update_rx,
        });
    }
    let adapter = LadderAdapter {
        reports: report_rxs,
        updates: update_txs,
        cell,
        t0,
        nu,
    };
    (adapter, ports)
}

impl LadderAdapter {
    /// Serves every ladder round in `rounds`, in order.
    ///
    /// Trips the cancellation token on its own failures.
    pub fn serve(
        self,
        rounds: impl IntoIterator<Item = usize>,
        wait: &WaitPolicy,
    ) -> Result<(), PtError> {
        let result = self.serve_rounds(rounds, wait);
        if let Err(err) = &result {
            if !err.is_cancellation() {
                wait.cancel.cancel();
            }
        }
        result
    }

    fn serve_rounds(
        &self,
        rounds: impl IntoIterator<Item = usize>,
        wait: &WaitPolicy,
    ) -> Result<(), PtError> {
        let mut served = 0usize;
        for iteration in rounds {
            let mut tallies = Vec::with_capacity(self.reports.len());
            for (chain, rx) in self.reports.iter().enumerate() {
                let report = wait.recv(rx, "ladder-adapter", &format!("chain-{chain}"))?;
                if report.iteration != iteration || report.chain != chain {
                    return Err(PtError::WorkerFailure(
                        ErrorInfo::new("ladder-desync", "ladder round iteration mismatch")
                            .with_context("chain", report.chain)
                            .with_context("expected", iteration)
                            .with_context("found", report.iteration),
                    ));
                }
                tallies.push(report.upper_pair);
            }

            let current = self.cell.load();
            let next = adapt_round(&current, &tallies, iteration, self.t0, self.nu)?;
            debug!(iteration, epoch = next.epoch(), betas = ?next.betas(), "ladder adapted");
            let updates = ladder_updates(&next, iteration);
            self.cell.publish(next);
            for (chain, update) in updates.into_iter().enumerate() {
                wait.send(
                    &self.updates[chain],
                    update,
                    "ladder-adapter",
                    &format!("chain-{chain}"),
                )?;
            }
            served += 1;
        }
        info!(rounds = served, "ladder adapter finished");
        Ok(())
    }
}
