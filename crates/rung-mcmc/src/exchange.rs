//! Neighbour swap rounds.
//!
//! A round is resolved centrally: every chain offers its state, the
//! coordinator resolves all adjacent pairs in one fixed hottest-to-coldest
//! pass and hands each chain exactly one outcome. Only pairs of one parity
//! are eligible in a given round (even pairs on even iterations, odd pairs on
//! odd iterations), so the eligible pairs are disjoint and no chain can take
//! part in more than one swap per round.

use crossbeam_channel::{Receiver, Sender};
use rung_core::{ErrorInfo, PtError, RngHandle, Sample};
use tracing::{debug, trace};

use crate::sync::WaitPolicy;
use crate::tempering::{swap_accepted, swap_log_acceptance};

/// State a chain puts forward for a swap round.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapOffer {
    /// Offering chain.
    pub chain: usize,
    /// Iteration the round belongs to.
    pub iteration: usize,
    /// Inverse temperature of the offering chain.
    pub beta: f64,
    /// Current sample of the offering chain.
    pub sample: Sample,
}

/// What a chain learns from a resolved round.
#[derive(Debug, Clone, PartialEq)]
pub struct SwapOutcome {
    /// Iteration the round belongs to.
    pub iteration: usize,
    /// State the chain holds after the round.
    pub sample: Sample,
    /// The chain took part in a proposed swap.
    pub proposed: bool,
    /// The proposed swap was accepted.
    pub accepted: bool,
    /// The pair with the next-hotter chain was proposed.
    pub upper_proposed: bool,
    /// The pair with the next-hotter chain was accepted.
    pub upper_accepted: bool,
}

/// Decision taken for one adjacent pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairDecision {
    /// Colder chain of the pair; the hotter one is `lower + 1`.
    pub lower: usize,
    /// The pair won the `p_swap` draw.
    pub proposed: bool,
    /// The swap was accepted.
    pub accepted: bool,
}

/// Result of [`resolve_round`].
#[derive(Debug, Clone, PartialEq)]
pub struct RoundResolution {
    /// Samples after the round, indexed by chain.
    pub samples: Vec<Sample>,
    /// Decisions for the eligible pairs, in resolution order.
    pub pairs: Vec<PairDecision>,
}

impl RoundResolution {
    /// Splits the resolution into one outcome per chain.
    pub fn into_outcomes(self, iteration: usize) -> Vec<SwapOutcome> {
        let mut outcomes: Vec<SwapOutcome> = self
            .samples
            .into_iter()
            .map(|sample| SwapOutcome {
                iteration,
                sample,
                proposed: false,
                accepted: false,
                upper_proposed: false,
                upper_accepted: false,
            })
            .collect();
        for pair in &self.pairs {
            for chain in [pair.lower, pair.lower + 1] {
                outcomes[chain].proposed |= pair.proposed;
                outcomes[chain].accepted |= pair.accepted;
            }
            outcomes[pair.lower].upper_proposed = pair.proposed;
            outcomes[pair.lower].upper_accepted = pair.accepted;
        }
        outcomes
    }
}

/// Lower indices of the pairs eligible at `iteration`, hottest first.
pub fn eligible_pairs(iteration: usize, n_chains: usize) -> impl Iterator<Item = usize> {
    let parity = iteration % 2;
    (0..n_chains.saturating_sub(1))
        .rev()
        .filter(move |pair| pair % 2 == parity)
}

/// Resolves one swap round.
///
/// `betas[i]` and `samples[i]` belong to chain `i`. The returned samples are
/// always a permutation of the input samples.
pub fn resolve_round(
    iteration: usize,
    betas: &[f64],
    mut samples: Vec<Sample>,
    p_swap: f64,
    rng: &mut RngHandle,
) -> RoundResolution {
    let n_chains = samples.len().min(betas.len());
    let mut pairs = Vec::new();
    for lower in eligible_pairs(iteration, n_chains) {
        let upper = lower + 1;
        if !rng.chance(p_swap) {
            pairs.push(PairDecision {
                lower,
                proposed: false,
                accepted: false,
            });
            continue;
        }
        let cold = samples[lower].log_likelihood;
        let hot = samples[upper].log_likelihood;
        let log_acceptance = swap_log_acceptance(betas[lower], betas[upper], cold, hot);
        let accepted = swap_accepted(log_acceptance, cold, hot, rng.log_uniform());
        trace!(iteration, lower, log_acceptance, accepted, "swap proposed");
        if accepted {
            samples.swap(lower, upper);
        }
        pairs.push(PairDecision {
            lower,
            proposed: true,
            accepted,
        });
    }
    RoundResolution { samples, pairs }
}

/// Worker-side endpoints for swap rounds.
#[derive(Debug)]
pub struct SwapPort {
    chain: usize,
    offers: Sender<SwapOffer>,
    outcomes: Receiver<SwapOutcome>,
}

impl SwapPort {
    /// Offers the chain's state and waits for the resolved outcome.
    pub fn exchange(&self, offer: SwapOffer, wait: &WaitPolicy) -> Result<SwapOutcome, PtError> {
        let task = format!("chain-{}", self.chain);
        let iteration = offer.iteration;
        wait.send(&self.offers, offer, &task, "exchange-coordinator")?;
        let outcome = wait.recv(&self.outcomes, &task, "exchange-coordinator")?;
        if outcome.iteration != iteration {
            return Err(desync(self.chain, iteration, outcome.iteration));
        }
        Ok(outcome)
    }
}

/// Central side of the swap rounds, driven by the orchestrator thread.
#[derive(Debug)]
pub struct ExchangeCoordinator {
    offers: Vec<Receiver<SwapOffer>>,
    outcomes: Vec<Sender<SwapOutcome>>,
    p_swap: f64,
    rng: RngHandle,
}

/// Builds one coordinator and one port per chain.
pub fn exchange_channels(
    n_chains: usize,
    p_swap: f64,
    rng: RngHandle,
) -> (ExchangeCoordinator, Vec<SwapPort>) {
    let mut offer_rxs = Vec::with_capacity(n_chains);
    let mut outcome_txs = Vec::with_capacity(n_chains);
    let mut ports = Vec::with_capacity(n_chains);
    for chain in 0..n_chains {
        let (offer_tx, offer_rx) = crossbeam_channel::unbounded();
        let (outcome_tx, outcome_rx) = crossbeam_channel::unbounded();
        offer_rxs.push(offer_rx);
        outcome_txs.push(outcome_tx);
        ports.push(SwapPort {
            chain,
            offers: offer_tx,
            outcomes: outcome_rx,
        });
    }
    let coordinator = ExchangeCoordinator {
        offers: offer_rxs,
        outcomes: outcome_txs,
        p_swap,
        rng,
    };
    (coordinator, ports)
}

impl ExchangeCoordinator {
    /// Serves every round in `rounds`, in order.
    ///
    /// All offers of a round are gathered before any outcome is sent. On a
    /// failure other than cancellation the token is tripped before the
    /// channels are dropped, so blocked chains observe a cancellation.
    pub fn serve(
        mut self,
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
        &mut self,
        rounds: impl IntoIterator<Item = usize>,
        wait: &WaitPolicy,
    ) -> Result<(), PtError> {
        let mut served = 0usize;
        for iteration in rounds {
            let mut betas = Vec::with_capacity(self.offers.len());
            let mut samples = Vec::with_capacity(self.offers.len());
            for (chain, rx) in self.offers.iter().enumerate() {
                let offer = wait.recv(rx, "exchange-coordinator", &format!("chain-{chain}"))?;
                if offer.iteration != iteration || offer.chain != chain {
                    return Err(desync(offer.chain, iteration, offer.iteration));
                }
                betas.push(offer.beta);
                samples.push(offer.sample);
            }
            let resolution = resolve_round(iteration, &betas, samples, self.p_swap, &mut self.rng);
            for (chain, outcome) in resolution.into_outcomes(iteration).into_iter().enumerate() {
                wait.send(
                    &self.outcomes[chain],
                    outcome,
                    "exchange-coordinator",
                    &format!("chain-{chain}"),
                )?;
            }
            served += 1;
        }
        debug!(rounds = served, "exchange coordinator finished");
        Ok(())
    }
}

fn desync(chain: usize, expected: usize, found: usize) -> PtError {
    PtError::WorkerFailure(
        ErrorInfo::new("swap-desync", "swap round iteration mismatch")
            .with_context("chain", chain)
            .with_context("expected", expected)
            .with_context("found", found),
    )
}
