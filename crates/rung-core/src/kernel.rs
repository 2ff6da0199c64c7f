//! Collaborator contract between a chain worker and its proposal kernel.

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, PtError};
use crate::rng::RngHandle;
use crate::types::{HistoryRow, Ladder, Sample};

/// Proposal families understood by the reference kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProposalKind {
    /// Independent draw from the (bounded) prior support.
    PriorDraw,
    /// Full-dimensional Gaussian random walk shaped by the adapted covariance.
    Gaussian,
    /// Single-component adaptive Metropolis along one coordinate.
    Scam,
}

impl ProposalKind {
    /// Stable name used in statistics records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalKind::PriorDraw => "prior-draw",
            ProposalKind::Gaussian => "gaussian",
            ProposalKind::Scam => "scam",
        }
    }
}

/// One entry of a proposal weight table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProposalWeight {
    /// Proposal family.
    pub kind: ProposalKind,
    /// Relative (unnormalised) weight.
    pub weight: f64,
}

/// Normalised proposal-kind weight table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalTable {
    entries: Vec<ProposalWeight>,
}

impl ProposalTable {
    /// Normalises the weights; rejects empty, negative or all-zero tables.
    pub fn new(weights: &[ProposalWeight]) -> Result<Self, PtError> {
        let total: f64 = weights.iter().map(|entry| entry.weight).sum();
        if weights.is_empty() || !total.is_finite() || total <= 0.0 {
            return Err(PtError::InvalidConfig(ErrorInfo::new(
                "proposal-weights",
                "proposal table needs at least one positive weight",
            )));
        }
        if let Some(bad) = weights.iter().find(|entry| entry.weight < 0.0) {
            return Err(PtError::InvalidConfig(
                ErrorInfo::new("proposal-weights", "proposal weights must be non-negative")
                    .with_context("kind", bad.kind.as_str()),
            ));
        }
        let entries = weights
            .iter()
            .filter(|entry| entry.weight > 0.0)
            .map(|entry| ProposalWeight {
                kind: entry.kind,
                weight: entry.weight / total,
            })
            .collect();
        Ok(Self { entries })
    }

    /// Normalised entries with non-zero weight.
    pub fn entries(&self) -> &[ProposalWeight] {
        &self.entries
    }

    /// True when `kind` has a non-zero weight.
    pub fn contains(&self, kind: ProposalKind) -> bool {
        self.entries.iter().any(|entry| entry.kind == kind)
    }

    /// Picks a proposal kind according to the weights.
    pub fn choose(&self, rng: &mut RngHandle) -> ProposalKind {
        let draw = rng.uniform();
        let mut cumulative = 0.0;
        for entry in &self.entries {
            cumulative += entry.weight;
            if draw < cumulative {
                return entry.kind;
            }
        }
        // Rounding can leave the cumulative sum a hair below one.
        self.entries
            .last()
            .map(|entry| entry.kind)
            .unwrap_or(ProposalKind::Gaussian)
    }
}

/// Jump and acceptance counters for one proposal kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalStat {
    /// Number of proposals of this kind.
    pub n_proposed: u64,
    /// Number of accepted proposals of this kind.
    pub n_accepted: u64,
}

impl ProposalStat {
    /// Records one proposal.
    pub fn record(&mut self, accepted: bool) {
        self.n_proposed += 1;
        if accepted {
            self.n_accepted += 1;
        }
    }

    /// Accepted / proposed, or zero before the first proposal.
    pub fn acceptance_rate(&self) -> f64 {
        if self.n_proposed == 0 {
            0.0
        } else {
            self.n_accepted as f64 / self.n_proposed as f64
        }
    }
}

/// Read-only context handed to [`ChainKernel::full_step`].
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// Zero-based iteration index.
    pub iteration: usize,
    /// Index of the chain on the ladder (0 is the coldest).
    pub chain: usize,
    /// Current inverse temperature of the chain.
    pub beta: f64,
    /// Latest published ladder snapshot.
    pub ladder: &'a Ladder,
}

/// Result of one kernel step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
    /// State of the chain after the step (the old state when rejected).
    pub sample: Sample,
    /// Proposal family that was used.
    pub kind: ProposalKind,
    /// Whether the proposal was accepted.
    pub accepted: bool,
}

/// Single-chain proposal/acceptance kernel driven by a chain worker.
///
/// The kernel owns the chain's adaptation sub-state (covariance estimate,
/// mixture modes, density estimate). It never sees another chain: the worker
/// hands it the chain's own history and current state only.
pub trait ChainKernel: Send {
    /// Advances the chain by one Metropolis step at `ctx.beta`.
    fn full_step(
        &mut self,
        ctx: &StepContext<'_>,
        current: &Sample,
        rng: &mut RngHandle,
    ) -> Result<StepOutcome, PtError>;

    /// Re-estimates the proposal covariance from the chain history.
    fn update_covariance(&mut self, _history: &[HistoryRow]) -> Result<(), PtError> {
        Ok(())
    }

    /// Re-estimates mixture modes from the chain history.
    fn update_modes(&mut self, _history: &[HistoryRow]) -> Result<(), PtError> {
        Ok(())
    }

    /// Rebuilds the density estimate used by density-based proposals.
    fn update_density_estimate(&mut self, _history: &[HistoryRow]) -> Result<(), PtError> {
        Ok(())
    }

    /// Feeds one resumed checkpoint row into the kernel's state.
    fn accept_history(&mut self, _sample: &Sample) {}

    /// Per-kind proposal counters, reported in the statistics record.
    fn proposal_stats(&self) -> Vec<(ProposalKind, ProposalStat)> {
        Vec::new()
    }
}
