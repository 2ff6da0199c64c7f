use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rung_core::{ErrorInfo, ProposalKind, ProposalTable, ProposalWeight, PtError};
use serde::{Deserialize, Serialize};

/// YAML-configurable parameters governing a tempering run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Number of chains on the ladder.
    #[serde(default = "default_n_chains")]
    pub n_chains: usize,
    /// Model dimension; taken from the model when omitted.
    #[serde(default)]
    pub dim: Option<usize>,
    /// Number of iterations to run (after any resumed history).
    #[serde(default)]
    pub n_iter: usize,
    /// Probability of proposing each eligible adjacent pair in a swap round.
    #[serde(default = "default_p_swap")]
    pub p_swap: f64,
    /// First iteration at which swap rounds and ladder adaptation run.
    #[serde(default = "default_swap_start_iter")]
    pub swap_start_iter: usize,
    /// Interval between local (per-chain) adaptation hooks.
    #[serde(default = "default_adapt_interval")]
    pub adapt_interval: usize,
    /// Maximum temperature; derived from the step table when omitted.
    #[serde(default)]
    pub t_max: Option<f64>,
    /// Enables the ladder adapter.
    #[serde(default = "default_true")]
    pub adapt_ladder: bool,
    /// Interval between ladder adaptation rounds.
    #[serde(default = "default_ladder_adapt_interval")]
    pub ladder_adapt_interval: usize,
    /// Robbins-Monro offset of the ladder adaptation step.
    #[serde(default = "default_ladder_adapt_t0")]
    pub ladder_adapt_t0: f64,
    /// Robbins-Monro scale of the ladder adaptation step.
    #[serde(default = "default_ladder_adapt_nu")]
    pub ladder_adapt_nu: f64,
    /// Interval between progress reports and checkpoint writes.
    #[serde(default = "default_print_interval")]
    pub print_interval: usize,
    /// Directory receiving per-chain checkpoints. `None` disables checkpoints.
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
    /// Records per-iteration diagnostics and writes `diagnostics_<i>.json`.
    #[serde(default)]
    pub debug: bool,
    /// Proposal weight table used by the reference kernel.
    #[serde(default = "default_proposals")]
    pub proposals: Vec<ProposalWeight>,
    /// Threading and wait bounds.
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Master seed policy.
    #[serde(default)]
    pub seed_policy: SeedPolicy,
    /// Resume behaviour.
    #[serde(default)]
    pub resume: ResumeConfig,
}

fn default_n_chains() -> usize {
    4
}

fn default_p_swap() -> f64 {
    0.5
}

fn default_swap_start_iter() -> usize {
    2500
}

fn default_adapt_interval() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

fn default_ladder_adapt_interval() -> usize {
    10
}

fn default_ladder_adapt_t0() -> f64 {
    1000.0
}

fn default_ladder_adapt_nu() -> f64 {
    100.0
}

fn default_print_interval() -> usize {
    2000
}

fn default_proposals() -> Vec<ProposalWeight> {
    vec![
        ProposalWeight {
            kind: ProposalKind::Gaussian,
            weight: 0.6,
        },
        ProposalWeight {
            kind: ProposalKind::Scam,
            weight: 0.3,
        },
        ProposalWeight {
            kind: ProposalKind::PriorDraw,
            weight: 0.1,
        },
    ]
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            n_chains: default_n_chains(),
            dim: None,
            n_iter: 0,
            p_swap: default_p_swap(),
            swap_start_iter: default_swap_start_iter(),
            adapt_interval: default_adapt_interval(),
            t_max: None,
            adapt_ladder: true,
            ladder_adapt_interval: default_ladder_adapt_interval(),
            ladder_adapt_t0: default_ladder_adapt_t0(),
            ladder_adapt_nu: default_ladder_adapt_nu(),
            print_interval: default_print_interval(),
            checkpoint_dir: None,
            debug: false,
            proposals: default_proposals(),
            execution: ExecutionConfig::default(),
            seed_policy: SeedPolicy::default(),
            resume: ResumeConfig::default(),
        }
    }
}

impl RunConfig {
    /// Parses a configuration from YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, PtError> {
        serde_yaml::from_str(text)
            .map_err(|err| PtError::InvalidConfig(ErrorInfo::new("config-parse", err.to_string())))
    }

    /// Reads and parses a YAML configuration file.
    pub fn from_yaml_path(path: &Path) -> Result<Self, PtError> {
        let text = fs::read_to_string(path).map_err(|err| {
            PtError::Io(
                ErrorInfo::new("config-read", err.to_string())
                    .with_context("path", path.display()),
            )
        })?;
        Self::from_yaml_str(&text).map_err(|err| match err {
            PtError::InvalidConfig(info) => {
                PtError::InvalidConfig(info.with_context("path", path.display()))
            }
            other => other,
        })
    }

    /// Checks every documented bound; `model_dim` is the dimension of the model in use.
    pub fn validate(&self, model_dim: usize) -> Result<(), PtError> {
        if self.n_chains < 1 {
            return Err(invalid("n-chains", "n_chains must be >= 1", self.n_chains));
        }
        if model_dim < 1 {
            return Err(invalid("dim", "model dimension must be >= 1", model_dim));
        }
        if let Some(dim) = self.dim {
            if dim != model_dim {
                return Err(PtError::InvalidConfig(
                    ErrorInfo::new("dim", "configured dimension differs from the model")
                        .with_context("configured", dim)
                        .with_context("model", model_dim),
                ));
            }
        }
        if !(0.0..=1.0).contains(&self.p_swap) {
            return Err(invalid("p-swap", "p_swap must lie in [0, 1]", self.p_swap));
        }
        if self.adapt_interval < 1 {
            return Err(invalid("adapt-interval", "adapt_interval must be >= 1", 0));
        }
        if self.ladder_adapt_interval < 1 {
            return Err(invalid(
                "ladder-adapt-interval",
                "ladder_adapt_interval must be >= 1",
                0,
            ));
        }
        if self.ladder_adapt_t0.is_nan() || self.ladder_adapt_t0 <= 0.0 {
            return Err(invalid(
                "ladder-adapt-t0",
                "ladder_adapt_t0 must be > 0",
                self.ladder_adapt_t0,
            ));
        }
        if self.ladder_adapt_nu.is_nan() || self.ladder_adapt_nu <= 0.0 {
            return Err(invalid(
                "ladder-adapt-nu",
                "ladder_adapt_nu must be > 0",
                self.ladder_adapt_nu,
            ));
        }
        if self.print_interval < 1 {
            return Err(invalid("print-interval", "print_interval must be >= 1", 0));
        }
        if let Some(t_max) = self.t_max {
            if !t_max.is_finite() || t_max <= 1.0 {
                return Err(invalid("t-max", "t_max must be finite and > 1", t_max));
            }
        }
        if self.resume.thin < 1 {
            return Err(invalid("resume-thin", "resume.thin must be >= 1", 0));
        }
        if self.execution.poll_interval_ms == 0 {
            return Err(invalid(
                "poll-interval",
                "execution.poll_interval_ms must be >= 1",
                0,
            ));
        }
        self.proposal_table()?;
        Ok(())
    }

    /// Normalised proposal table built from `proposals`.
    pub fn proposal_table(&self) -> Result<ProposalTable, PtError> {
        ProposalTable::new(&self.proposals)
    }

    /// True when a swap round happens at `iteration`.
    pub fn swap_round_due(&self, iteration: usize) -> bool {
        self.n_chains > 1 && self.p_swap > 0.0 && iteration >= self.swap_start_iter
    }

    /// True when the ladder adapter exists for this run.
    pub fn ladder_adapter_enabled(&self) -> bool {
        self.adapt_ladder && self.n_chains > 1 && self.n_iter > self.ladder_adapt_interval
    }

    /// True when a ladder round happens at `iteration`.
    pub fn ladder_round_due(&self, iteration: usize) -> bool {
        self.ladder_adapter_enabled()
            && iteration > 0
            && iteration >= self.swap_start_iter
            && iteration % self.ladder_adapt_interval == 0
    }
}

fn invalid(code: &str, message: &str, value: impl ToString) -> PtError {
    PtError::InvalidConfig(ErrorInfo::new(code, message).with_context("value", value))
}

/// Execution mode of the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// One thread per chain plus the coordinator and the optional adapter.
    #[default]
    Parallel,
    /// The same algorithm, cooperatively on the caller's thread.
    Sequential,
}

/// Threading and bounded-wait settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Parallel or sequential execution.
    #[serde(default)]
    pub mode: ExecutionMode,
    /// How often a blocked receive re-checks the cancellation token.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on any single wait for a peer. `None` waits until cancelled.
    #[serde(default)]
    pub exchange_timeout_ms: Option<u64>,
    /// Time allowed for remaining tasks to exit once the run is winding down.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    50
}

fn default_grace_period_ms() -> u64 {
    30_000
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
            exchange_timeout_ms: None,
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl ExecutionConfig {
    /// Poll interval as a duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Exchange timeout as a duration.
    pub fn exchange_timeout(&self) -> Option<Duration> {
        self.exchange_timeout_ms.map(Duration::from_millis)
    }

    /// Grace period as a duration.
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Deterministic seeding configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedPolicy {
    /// Master seed used for the run.
    #[serde(default = "default_master_seed")]
    pub master_seed: u64,
    /// Optional label recorded in the manifest.
    #[serde(default)]
    pub label: Option<String>,
}

fn default_master_seed() -> u64 {
    0x05EE_D5EE_DD15_5EED_u64
}

impl Default for SeedPolicy {
    fn default() -> Self {
        Self {
            master_seed: default_master_seed(),
            label: None,
        }
    }
}

/// Options applied when resuming from checkpoint files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumeConfig {
    /// Keep every `thin`-th stored row.
    #[serde(default = "default_thin")]
    pub thin: usize,
}

fn default_thin() -> usize {
    1
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            thin: default_thin(),
        }
    }
}
