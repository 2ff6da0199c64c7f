#![deny(missing_docs)]
#![doc = include_str!("../docs/sampler-api.md")]

/// Ladder adaptation rounds.
pub mod adapter;
/// Per-chain state and swap bookkeeping.
pub mod chain;
/// Per-chain checkpoint files.
pub mod checkpoint;
/// YAML configuration schema and defaults.
pub mod config;
/// Deterministic seed derivation helpers.
pub mod determinism;
/// Neighbour swap rounds.
pub mod exchange;
/// Run manifest serialization helpers.
pub mod manifest;
/// Reference Metropolis-Hastings kernel.
pub mod metropolis;
/// Public `run`/`resume` entry points.
pub mod orchestrator;
/// Cancellation and bounded waits.
pub mod sync;
/// Tracing subscriber setup.
pub mod telemetry;
/// Temperature ladder helpers.
pub mod tempering;
/// Per-chain worker loop.
pub mod worker;

pub use chain::{ChainDiagnostics, ChainState, SwapTally};
pub use config::{ExecutionConfig, ExecutionMode, ResumeConfig, RunConfig, SeedPolicy};
pub use manifest::RunManifest;
pub use metropolis::MetropolisKernel;
pub use orchestrator::{resume, resume_with_kernels, run, run_with_kernels, RunReport};
pub use telemetry::init_tracing;
pub use tempering::init_ladder;
pub use worker::ChainStatus;
