use std::fs;
use std::path::Path;

use rung_core::{ErrorInfo, PtError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::RunConfig;
use crate::determinism::RunSeeds;
use crate::worker::ChainStatus;

/// File name of the manifest inside the checkpoint directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Structured manifest describing a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Configuration used for the run.
    pub config: RunConfig,
    /// SHA-256 of the canonical JSON form of `config`.
    pub config_hash: String,
    /// Master seed of the run.
    pub master_seed: u64,
    /// Optional seed label captured from the configuration.
    pub seed_label: Option<String>,
    /// Seeds of every stream.
    pub seeds: RunSeeds,
    /// Maximum temperature of the ladder.
    pub t_max: f64,
    /// Ladder at the end of the run.
    pub final_betas: Vec<f64>,
    /// Number of ladder adaptations applied.
    pub ladder_epoch: u64,
    /// Terminal status of every chain.
    pub statuses: Vec<ChainStatus>,
    /// RFC 3339 time at which the manifest was written.
    pub created_at: String,
}

/// Hex SHA-256 of the configuration.
pub fn config_hash(config: &RunConfig) -> Result<String, PtError> {
    let bytes = serde_json::to_vec(config).map_err(|err| {
        PtError::Serde(ErrorInfo::new("config-serialize", err.to_string()))
    })?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

impl RunManifest {
    /// Writes the manifest to a JSON file.
    pub fn write(&self, path: &Path) -> Result<(), PtError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                PtError::Io(
                    ErrorInfo::new("manifest-mkdir", err.to_string())
                        .with_context("path", parent.display()),
                )
            })?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|err| {
            PtError::Serde(
                ErrorInfo::new("manifest-serialize", err.to_string())
                    .with_context("path", path.display()),
            )
        })?;
        fs::write(path, json).map_err(|err| {
            PtError::Io(
                ErrorInfo::new("manifest-write", err.to_string())
                    .with_context("path", path.display()),
            )
        })
    }

    /// Loads a manifest from disk.
    pub fn load(path: &Path) -> Result<Self, PtError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            PtError::Io(
                ErrorInfo::new("manifest-read", err.to_string())
                    .with_context("path", path.display()),
            )
        })?;
        serde_json::from_str(&contents).map_err(|err| {
            PtError::Serde(
                ErrorInfo::new("manifest-parse", err.to_string())
                    .with_context("path", path.display()),
            )
        })
    }
}
