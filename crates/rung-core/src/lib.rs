#![deny(missing_docs)]
#![doc = "Core traits and data types for the rung parallel-tempering sampler."]

pub mod errors;
pub mod kernel;
pub mod model;
pub mod rng;
mod types;

pub use errors::{ErrorInfo, PtError};
pub use kernel::{
    ChainKernel, ProposalKind, ProposalStat, ProposalTable, ProposalWeight, StepContext,
    StepOutcome,
};
pub use model::{LogDensityFn, Model, ParamPrior};
pub use rng::{derive_substream_seed, RngHandle};
pub use types::{HistoryRow, Ladder, Sample, LADDER_TOLERANCE};
