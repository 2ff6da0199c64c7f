use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, PtError};

/// Tolerance used when checking the ladder anchors.
pub const LADDER_TOLERANCE: f64 = 1e-9;

/// A point together with its cached log-likelihood and log-prior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Parameter vector (length equals the model dimension).
    pub point: Vec<f64>,
    /// Log-likelihood of `point` at unit temperature.
    pub log_likelihood: f64,
    /// Log-prior of `point`.
    pub log_prior: f64,
}

impl Sample {
    /// Bundles a point with its log densities.
    pub fn new(point: Vec<f64>, log_likelihood: f64, log_prior: f64) -> Self {
        Self {
            point,
            log_likelihood,
            log_prior,
        }
    }

    /// Model dimension of the sample.
    pub fn dim(&self) -> usize {
        self.point.len()
    }
}

/// One row of a chain history: `(point, log_likelihood)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    /// Recorded point.
    pub point: Vec<f64>,
    /// Log-likelihood associated with the point.
    pub log_likelihood: f64,
}

impl From<&Sample> for HistoryRow {
    fn from(sample: &Sample) -> Self {
        Self {
            point: sample.point.clone(),
            log_likelihood: sample.log_likelihood,
        }
    }
}

/// Immutable snapshot of the inverse-temperature ladder.
///
/// Betas are ordered coldest first: `betas[0] == 1` and the last rung equals
/// `1 / t_max`. A new snapshot replaces the old one on every adaptation; a
/// published ladder is never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ladder {
    betas: Vec<f64>,
    t_max: f64,
    epoch: u64,
}

impl Ladder {
    /// Validates and wraps a ladder.
    pub fn new(betas: Vec<f64>, t_max: f64) -> Result<Self, PtError> {
        Self::with_epoch(betas, t_max, 0)
    }

    /// Validates and wraps a ladder tagged with an adaptation epoch.
    pub fn with_epoch(betas: Vec<f64>, t_max: f64, epoch: u64) -> Result<Self, PtError> {
        validate_betas(&betas, t_max)?;
        Ok(Self {
            betas,
            t_max,
            epoch,
        })
    }

    /// Inverse temperatures, coldest first.
    pub fn betas(&self) -> &[f64] {
        &self.betas
    }

    /// Maximum temperature of the ladder.
    pub fn t_max(&self) -> f64 {
        self.t_max
    }

    /// Number of adaptations applied since the ladder was initialised.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Number of rungs.
    pub fn len(&self) -> usize {
        self.betas.len()
    }

    /// True when the ladder has no rungs (never the case for a validated ladder).
    pub fn is_empty(&self) -> bool {
        self.betas.is_empty()
    }

    /// Inverse temperature of rung `index`.
    pub fn beta(&self, index: usize) -> Option<f64> {
        self.betas.get(index).copied()
    }

    /// Gap to the next-hotter rung; zero for the hottest chain.
    pub fn dbeta_above(&self, index: usize) -> f64 {
        match (self.betas.get(index), self.betas.get(index + 1)) {
            (Some(cold), Some(hot)) => cold - hot,
            _ => 0.0,
        }
    }

    /// Temperatures `1 / beta`, coldest first.
    pub fn temperatures(&self) -> Vec<f64> {
        self.betas.iter().map(|beta| 1.0 / beta).collect()
    }
}

fn validate_betas(betas: &[f64], t_max: f64) -> Result<(), PtError> {
    if betas.is_empty() {
        return Err(PtError::InvalidConfig(ErrorInfo::new(
            "ladder-empty",
            "ladder must contain at least one rung",
        )));
    }
    if (betas[0] - 1.0).abs() > LADDER_TOLERANCE {
        return Err(PtError::InvalidConfig(
            ErrorInfo::new("ladder-anchor", "coldest rung must have beta == 1")
                .with_context("beta0", betas[0]),
        ));
    }
    if !t_max.is_finite() || t_max < 1.0 {
        return Err(PtError::InvalidConfig(
            ErrorInfo::new("ladder-tmax", "maximum temperature must be finite and >= 1")
                .with_context("t_max", t_max),
        ));
    }
    let floor = 1.0 / t_max;
    for (index, beta) in betas.iter().enumerate() {
        if !beta.is_finite() || *beta < floor * (1.0 - LADDER_TOLERANCE) {
            return Err(PtError::InvalidConfig(
                ErrorInfo::new("ladder-range", "beta outside [1/t_max, 1]")
                    .with_context("index", index)
                    .with_context("beta", beta),
            ));
        }
    }
    for (index, pair) in betas.windows(2).enumerate() {
        if pair[1] >= pair[0] {
            return Err(PtError::InvalidConfig(
                ErrorInfo::new("ladder-order", "betas must be strictly decreasing")
                    .with_context("index", index + 1)
                    .with_context("beta", pair[1]),
            ));
        }
    }
    Ok(())
}
