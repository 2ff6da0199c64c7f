use std::fmt;

use rung_core::{ChainKernel, HistoryRow, ProposalKind, ProposalStat, RngHandle, Sample};
use serde::{Deserialize, Serialize};

use crate::exchange::SwapOutcome;

/// Proposed/accepted counters for one adjacent pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapTally {
    /// Swaps proposed for the pair.
    pub proposed: u64,
    /// Swaps accepted for the pair.
    pub accepted: u64,
}

impl SwapTally {
    /// Accepted / proposed, zero before the first proposal.
    pub fn ratio(&self) -> f64 {
        if self.proposed == 0 {
            0.0
        } else {
            self.accepted as f64 / self.proposed as f64
        }
    }
}

/// Per-iteration traces kept when the run is in debug mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainDiagnostics {
    /// Temperature of the chain after every iteration.
    pub temperatures: Vec<f64>,
    /// Iterations at which the chain took part in an accepted swap.
    pub swap_events: Vec<usize>,
    /// Lifetime accepted-swap counter after every iteration.
    pub swap_accepted: Vec<u64>,
    /// Lifetime proposed-swap counter after every iteration.
    pub swap_proposed: Vec<u64>,
}

/// State of one chain, owned by exactly one worker for the whole run.
pub struct ChainState {
    index: usize,
    beta: f64,
    dbeta_above: f64,
    current: Sample,
    swap_accepted: u64,
    swap_proposed: u64,
    upper_pair: SwapTally,
    kernel: Box<dyn ChainKernel>,
    rng: RngHandle,
    history: Vec<HistoryRow>,
    max_log_likelihood: f64,
    rows_persisted: usize,
    diagnostics: Option<ChainDiagnostics>,
}

impl ChainState {
    /// Creates a chain positioned at `initial`, which becomes the first history row.
    pub fn new(
        index: usize,
        beta: f64,
        dbeta_above: f64,
        initial: Sample,
        kernel: Box<dyn ChainKernel>,
        rng: RngHandle,
        debug: bool,
    ) -> Self {
        let mut state = Self::from_history(
            index,
            beta,
            dbeta_above,
            initial,
            Vec::new(),
            kernel,
            rng,
            debug,
        );
        state.push_current();
        state
    }

    /// Creates a chain from a resumed history; `current` is not appended again.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_history(
        index: usize,
        beta: f64,
        dbeta_above: f64,
        current: Sample,
        history: Vec<HistoryRow>,
        kernel: Box<dyn ChainKernel>,
        rng: RngHandle,
        debug: bool,
    ) -> Self {
        let max_log_likelihood = history
            .iter()
            .map(|row| row.log_likelihood)
            .fold(f64::NEG_INFINITY, f64::max);
        Self {
            index,
            beta,
            dbeta_above,
            current,
            swap_accepted: 0,
            swap_proposed: 0,
            upper_pair: SwapTally::default(),
            kernel,
            rng,
            history,
            max_log_likelihood,
            rows_persisted: 0,
            diagnostics: debug.then(ChainDiagnostics::default),
        }
    }

    /// Position of the chain on the ladder (0 is the coldest).
    pub fn index(&self) -> usize {
        self.index
    }

    /// Current inverse temperature.
    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Gap to the next-hotter rung, zero for the hottest chain.
    pub fn dbeta_above(&self) -> f64 {
        self.dbeta_above
    }

    /// Current temperature `1 / beta`.
    pub fn temperature(&self) -> f64 {
        1.0 / self.beta
    }

    /// Current sample.
    pub fn current(&self) -> &Sample {
        &self.current
    }

    /// Replaces the current sample without touching the history.
    pub fn set_current(&mut self, sample: Sample) {
        self.current = sample;
    }

    /// Updates the lifetime swap counters.
    pub fn record_swap(&mut self, proposed: bool, accepted: bool) {
        if proposed {
            self.swap_proposed += 1;
        }
        if accepted {
            self.swap_accepted += 1;
        }
    }

    /// Lifetime accepted swaps.
    pub fn swap_accepted(&self) -> u64 {
        self.swap_accepted
    }

    /// Lifetime proposed swaps.
    pub fn swap_proposed(&self) -> u64 {
        self.swap_proposed
    }

    /// Accepted / proposed swaps, zero before the first proposal.
    pub fn swap_acceptance_ratio(&self) -> f64 {
        SwapTally {
            proposed: self.swap_proposed,
            accepted: self.swap_accepted,
        }
        .ratio()
    }

    /// Tally of the pair formed with the next-hotter chain.
    pub fn upper_pair(&self) -> SwapTally {
        self.upper_pair
    }

    /// Recorded `(point, log_likelihood)` rows in order.
    pub fn history(&self) -> &[HistoryRow] {
        &self.history
    }

    /// Largest log-likelihood seen in the history.
    pub fn max_log_likelihood(&self) -> f64 {
        self.max_log_likelihood
    }

    /// Per-iteration traces, present in debug mode.
    pub fn diagnostics(&self) -> Option<&ChainDiagnostics> {
        self.diagnostics.as_ref()
    }

    /// Per-kind proposal counters reported by the kernel.
    pub fn proposal_stats(&self) -> Vec<(ProposalKind, ProposalStat)> {
        self.kernel.proposal_stats()
    }

    /// The chain's kernel.
    pub fn kernel(&self) -> &dyn ChainKernel {
        self.kernel.as_ref()
    }

    pub(crate) fn kernel_and_rng(&mut self) -> (&mut dyn ChainKernel, &mut RngHandle) {
        (self.kernel.as_mut(), &mut self.rng)
    }

    pub(crate) fn kernel_with_history(&mut self) -> (&mut dyn ChainKernel, &[HistoryRow]) {
        (self.kernel.as_mut(), &self.history)
    }

    pub(crate) fn restore_swap_counters(&mut self, accepted: u64, proposed: u64) {
        self.swap_accepted = accepted;
        self.swap_proposed = proposed;
    }

    pub(crate) fn set_ladder_position(&mut self, beta: f64, dbeta_above: f64) {
        self.beta = beta;
        self.dbeta_above = dbeta_above;
    }

    /// Appends the current sample to the history.
    pub(crate) fn push_current(&mut self) {
        if self.current.log_likelihood > self.max_log_likelihood {
            self.max_log_likelihood = self.current.log_likelihood;
        }
        self.history.push(HistoryRow::from(&self.current));
    }

    pub(crate) fn apply_swap(&mut self, outcome: SwapOutcome, iteration: usize) {
        self.record_swap(outcome.proposed, outcome.accepted);
        if outcome.upper_proposed {
            self.upper_pair.proposed += 1;
        }
        if outcome.upper_accepted {
            self.upper_pair.accepted += 1;
        }
        if outcome.accepted {
            if let Some(diagnostics) = self.diagnostics.as_mut() {
                diagnostics.swap_events.push(iteration);
            }
        }
        self.current = outcome.sample;
    }

    pub(crate) fn trace_iteration(&mut self) {
        let temperature = self.temperature();
        let (accepted, proposed) = (self.swap_accepted, self.swap_proposed);
        if let Some(diagnostics) = self.diagnostics.as_mut() {
            diagnostics.temperatures.push(temperature);
            diagnostics.swap_accepted.push(accepted);
            diagnostics.swap_proposed.push(proposed);
        }
    }

    pub(crate) fn rows_persisted(&self) -> usize {
        self.rows_persisted
    }

    pub(crate) fn mark_persisted(&mut self, rows: usize) {
        self.rows_persisted = rows;
    }
}

impl fmt::Debug for ChainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainState")
            .field("index", &self.index)
            .field("beta", &self.beta)
            .field("dbeta_above", &self.dbeta_above)
            .field("current", &self.current)
            .field("swap_accepted", &self.swap_accepted)
            .field("swap_proposed", &self.swap_proposed)
            .field("history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}
