//! Reference Metropolis-Hastings kernel with covariance adaptation.

use indexmap::IndexMap;
use rand::Rng;
use rand_distr::StandardNormal;
use rung_core::{
    ChainKernel, HistoryRow, Model, ProposalKind, ProposalStat, ProposalTable, PtError,
    RngHandle, Sample, StepContext, StepOutcome,
};
use tracing::trace;

/// Standard deviation of the initial diagonal proposal covariance.
pub const INITIAL_SCALE: f64 = 0.01;

/// Fraction of the history discarded before estimating the covariance.
pub const COVARIANCE_BURN_FRACTION: f64 = 0.25;

const JUMP_SCALE: f64 = 2.38;

/// Metropolis-Hastings kernel driven by a weighted proposal table.
///
/// Gaussian proposals are shaped by the Cholesky factor of the adapted
/// covariance and scaled by `2.38 / sqrt(dim)`. SCAM proposals move one
/// random coordinate by `2.38 * sqrt(cov[j][j])`. Prior draws sample the
/// bounded prior box uniformly and fall back to a Gaussian move when a
/// parameter is unbounded.
#[derive(Debug, Clone)]
pub struct MetropolisKernel {
    model: Model,
    table: ProposalTable,
    covariance: Vec<Vec<f64>>,
    cholesky: Vec<Vec<f64>>,
    stats: IndexMap<ProposalKind, ProposalStat>,
}

impl MetropolisKernel {
    /// Creates a kernel with the initial diagonal covariance.
    pub fn new(model: Model, table: ProposalTable) -> Self {
        let dim = model.dim();
        let covariance = diagonal(dim, INITIAL_SCALE * INITIAL_SCALE);
        let cholesky = diagonal(dim, INITIAL_SCALE);
        let stats = table
            .entries()
            .iter()
            .map(|entry| (entry.kind, ProposalStat::default()))
            .collect();
        Self {
            model,
            table,
            covariance,
            cholesky,
            stats,
        }
    }

    /// Current proposal covariance.
    pub fn covariance(&self) -> &[Vec<f64>] {
        &self.covariance
    }

    fn propose(&self, kind: ProposalKind, x: &[f64], rng: &mut RngHandle) -> Vec<f64> {
        let dim = x.len();
        match kind {
            ProposalKind::PriorDraw if self.model.priors().iter().all(|p| p.is_bounded()) => self
                .model
                .priors()
                .iter()
                .map(|prior| rng.gen_range(prior.lower..prior.upper))
                .collect(),
            ProposalKind::Scam => {
                let j = rng.gen_range(0..dim);
                let z = rng.sample::<f64, _>(StandardNormal);
                let mut y = x.to_vec();
                y[j] += JUMP_SCALE * self.covariance[j][j].sqrt() * z;
                y
            }
            _ => {
                let z: Vec<f64> = (0..dim)
                    .map(|_| rng.sample::<f64, _>(StandardNormal))
                    .collect();
                let scale = JUMP_SCALE / (dim as f64).sqrt();
                (0..dim)
                    .map(|i| {
                        let shift: f64 = (0..=i).map(|k| self.cholesky[i][k] * z[k]).sum();
                        x[i] + scale * shift
                    })
                    .collect()
            }
        }
    }
}

impl ChainKernel for MetropolisKernel {
    fn full_step(
        &mut self,
        ctx: &StepContext<'_>,
        current: &Sample,
        rng: &mut RngHandle,
    ) -> Result<StepOutcome, PtError> {
        self.model.check_dim(&current.point)?;
        let kind = self.table.choose(rng);
        let candidate = self.propose(kind, &current.point, rng);
        let log_likelihood = self.model.log_likelihood(&candidate);
        let log_prior = self.model.log_prior(&candidate);

        // Every proposal kind is symmetric here, so the Hastings term is zero.
        let accepted = if !log_likelihood.is_finite() || log_prior == f64::NEG_INFINITY {
            false
        } else {
            let log_mh = (log_likelihood - current.log_likelihood) * ctx.beta + log_prior
                - current.log_prior;
            log_mh > rng.log_uniform()
        };
        self.stats.entry(kind).or_default().record(accepted);
        trace!(chain = ctx.chain, iteration = ctx.iteration, kind = kind.as_str(), accepted);

        let sample = if accepted {
            Sample::new(candidate, log_likelihood, log_prior)
        } else {
            current.clone()
        };
        Ok(StepOutcome {
            sample,
            kind,
            accepted,
        })
    }

    fn update_covariance(&mut self, history: &[HistoryRow]) -> Result<(), PtError> {
        let dim = self.model.dim();
        let start = (COVARIANCE_BURN_FRACTION * history.len() as f64) as usize;
        let rows = &history[start..];
        if rows.len() < dim + 2 {
            return Ok(());
        }
        let covariance = sample_covariance(rows, dim);
        let cholesky = cholesky(&covariance).unwrap_or_else(|| {
            (0..dim)
                .map(|i| {
                    (0..dim)
                        .map(|k| if i == k { covariance[i][i].max(0.0).sqrt() } else { 0.0 })
                        .collect()
                })
                .collect()
        });
        if covariance.iter().flatten().all(|value| value.is_finite())
            && (0..dim).all(|i| covariance[i][i] > 0.0)
        {
            self.covariance = covariance;
            self.cholesky = cholesky;
        }
        Ok(())
    }

    fn proposal_stats(&self) -> Vec<(ProposalKind, ProposalStat)> {
        self.stats.iter().map(|(kind, stat)| (*kind, *stat)).collect()
    }
}

fn diagonal(dim: usize, value: f64) -> Vec<Vec<f64>> {
    (0..dim)
        .map(|i| (0..dim).map(|k| if i == k { value } else { 0.0 }).collect())
        .collect()
}

/// Unbiased sample covariance of the rows' points.
pub fn sample_covariance(rows: &[HistoryRow], dim: usize) -> Vec<Vec<f64>> {
    let n = rows.len() as f64;
    let mut mean = vec![0.0; dim];
    for row in rows {
        for (acc, value) in mean.iter_mut().zip(&row.point) {
            *acc += value / n;
        }
    }
    let mut covariance = vec![vec![0.0; dim]; dim];
    for row in rows {
        for i in 0..dim {
            let di = row.point[i] - mean[i];
            for k in 0..=i {
                covariance[i][k] += di * (row.point[k] - mean[k]) / (n - 1.0);
            }
        }
    }
    for i in 0..dim {
        for k in 0..i {
            covariance[k][i] = covariance[i][k];
        }
    }
    covariance
}

/// Lower Cholesky factor, `None` when the matrix is not positive definite.
pub fn cholesky(matrix: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let dim = matrix.len();
    let mut factor = vec![vec![0.0; dim]; dim];
    for i in 0..dim {
        for k in 0..=i {
            let partial: f64 = (0..k).map(|j| factor[i][j] * factor[k][j]).sum();
            if i == k {
                let pivot = matrix[i][i] - partial;
                if pivot <= 0.0 || !pivot.is_finite() {
                    return None;
                }
                factor[i][i] = pivot.sqrt();
            } else {
                factor[i][k] = (matrix[i][k] - partial) / factor[k][k];
            }
        }
    }
    Some(factor)
}
