use rung_core::{derive_substream_seed, ErrorInfo, PtError};
use serde::{Deserialize, Serialize};

/// Derives the deterministic seed of a chain.
pub fn chain_seed(master_seed: u64, chain_index: usize) -> u64 {
    derive_substream_seed(master_seed, chain_index as u64)
}

/// Derives the seed of the swap coordinator stream.
pub fn exchange_seed(master_seed: u64) -> u64 {
    derive_substream_seed(master_seed ^ 0xA5A5_A5A5_A5A5_A5A5, 0)
}

/// Seeds actually used by a run, recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSeeds {
    /// Seed of every chain stream.
    pub chains: Vec<u64>,
    /// Seed of the swap coordinator stream.
    pub exchange: u64,
}

impl RunSeeds {
    /// Derives the seeds from the master seed; explicit chain seeds win.
    pub fn resolve(
        master_seed: u64,
        n_chains: usize,
        explicit: Option<&[u64]>,
    ) -> Result<Self, PtError> {
        let chains = match explicit {
            Some(seeds) if seeds.len() != n_chains => {
                return Err(PtError::InvalidConfig(
                    ErrorInfo::new("seeds", "one seed per chain is required")
                        .with_context("expected", n_chains)
                        .with_context("found", seeds.len()),
                ));
            }
            Some(seeds) => seeds.to_vec(),
            None => (0..n_chains)
                .map(|index| chain_seed(master_seed, index))
                .collect(),
        };
        Ok(Self {
            chains,
            exchange: exchange_seed(master_seed),
        })
    }
}
