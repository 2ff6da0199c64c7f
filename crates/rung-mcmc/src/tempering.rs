use rung_core::{ErrorInfo, PtError, LADDER_TOLERANCE};

/// Empirical per-step temperature ratios, indexed by `dim - 1`.
///
/// Each entry is the ratio between neighbouring temperatures that keeps the
/// swap acceptance near 25 % for a Gaussian target of that dimension.
pub const TEMPERATURE_STEPS: [f64; 100] = [
    25.2741, 7.0, 4.47502, 3.5236, 3.0232, 2.71225, 2.49879, 2.34226, 2.22198, 2.12628, 2.04807,
    1.98276, 1.92728, 1.87946, 1.83774, 1.80096, 1.76826, 1.73895, 1.7125, 1.68849, 1.66657,
    1.64647, 1.62795, 1.61083, 1.59494, 1.58014, 1.56632, 1.55338, 1.54123, 1.5298, 1.51901,
    1.50881, 1.49916, 1.49, 1.4813, 1.47302, 1.46512, 1.45759, 1.45039, 1.4435, 1.4369, 1.43056,
    1.42448, 1.41864, 1.41302, 1.40761, 1.40239, 1.39736, 1.3925, 1.38781, 1.38327, 1.37888,
    1.37463, 1.37051, 1.36652, 1.36265, 1.35889, 1.35524, 1.3517, 1.34825, 1.3449, 1.34164,
    1.33847, 1.33538, 1.33236, 1.32943, 1.32656, 1.32377, 1.32104, 1.31838, 1.31578, 1.31325,
    1.31076, 1.30834, 1.30596, 1.30364, 1.30137, 1.29915, 1.29697, 1.29484, 1.29275, 1.29071,
    1.2887, 1.28673, 1.2848, 1.28291, 1.28106, 1.27923, 1.27745, 1.27569, 1.27397, 1.27227,
    1.27061, 1.26898, 1.26737, 1.26579, 1.26424, 1.26271, 1.26121, 1.25973,
];

/// Builds the initial ladder from the embedded step table.
///
/// Returns `(t_max, betas)` with betas log-spaced from `1` down to `1 / t_max`.
pub fn init_ladder(
    dim: usize,
    n_chains: usize,
    t_max: Option<f64>,
) -> Result<(f64, Vec<f64>), PtError> {
    init_ladder_with_table(&TEMPERATURE_STEPS, dim, n_chains, t_max)
}

/// Same as [`init_ladder`] with a caller-supplied step table.
pub fn init_ladder_with_table(
    table: &[f64],
    dim: usize,
    n_chains: usize,
    t_max: Option<f64>,
) -> Result<(f64, Vec<f64>), PtError> {
    if n_chains < 1 {
        return Err(PtError::InvalidConfig(
            ErrorInfo::new("n-chains", "ladder needs at least one chain")
                .with_context("n_chains", n_chains),
        ));
    }
    if dim < 1 {
        return Err(PtError::InvalidConfig(
            ErrorInfo::new("dim", "ladder needs a model dimension >= 1").with_context("dim", dim),
        ));
    }
    if let Some(value) = t_max {
        if !value.is_finite() || value <= 1.0 {
            return Err(PtError::InvalidConfig(
                ErrorInfo::new("t-max", "t_max must be finite and > 1")
                    .with_context("t_max", value),
            ));
        }
    }
    if n_chains == 1 {
        return Ok((t_max.unwrap_or(1.0), vec![1.0]));
    }

    let t_max = match t_max {
        Some(value) => value,
        None => step_ratio(table, dim).powi((n_chains - 1) as i32),
    };
    if !t_max.is_finite() {
        return Err(PtError::InvalidConfig(
            ErrorInfo::new("t-max", "derived t_max overflowed")
                .with_context("dim", dim)
                .with_context("n_chains", n_chains)
                .with_hint("pass an explicit t_max or use fewer chains"),
        ));
    }

    let span = (n_chains - 1) as f64;
    let log_t_max = t_max.ln();
    let mut betas: Vec<f64> = (0..n_chains)
        .map(|index| (-log_t_max * index as f64 / span).exp())
        .collect();
    betas[0] = 1.0;
    betas[n_chains - 1] = 1.0 / t_max;
    Ok((t_max, betas))
}

/// Temperature ratio between neighbouring rungs for a model of dimension `dim`.
pub fn step_ratio(table: &[f64], dim: usize) -> f64 {
    match table.get(dim.saturating_sub(1)) {
        Some(ratio) => *ratio,
        None => 1.0 + 2.0 * 4f64.ln().sqrt() / (dim as f64).sqrt(),
    }
}

/// Log acceptance of swapping the states of a colder and a hotter chain.
pub fn swap_log_acceptance(
    beta_cold: f64,
    beta_hot: f64,
    log_likelihood_cold: f64,
    log_likelihood_hot: f64,
) -> f64 {
    (beta_cold - beta_hot) * (log_likelihood_hot - log_likelihood_cold)
}

/// Applies the swap rule to a uniform draw `log_u`.
///
/// Equal log-likelihoods are never accepted, whatever the draw.
pub fn swap_accepted(
    log_acceptance: f64,
    log_likelihood_cold: f64,
    log_likelihood_hot: f64,
    log_u: f64,
) -> bool {
    log_likelihood_cold != log_likelihood_hot && log_u <= log_acceptance
}

/// Robbins-Monro step size of the ladder adaptation at `iteration`.
pub fn adaptation_rate(iteration: usize, t0: f64, nu: f64) -> f64 {
    (t0 / (iteration as f64 + t0)) / nu
}

/// Smallest interior temperature gap, as a fraction of the evenly spaced gap.
pub const MIN_GAP_FRACTION: f64 = 1e-3;

/// Recomputes the betas from per-pair swap acceptance ratios.
///
/// `pair_ratios[i]` is the acceptance ratio of the pair `(i, i + 1)`. The
/// coldest rung stays at `1`, the hottest at `1 / t_max`; only interior rungs
/// move. Each interior gap is kept at or above [`MIN_GAP_FRACTION`] of the
/// evenly spaced gap. The result is strictly decreasing and inside
/// `[1 / t_max, 1]`; when no such ladder can be formed the input is returned.
pub fn adapt_ladder(betas: &[f64], t_max: f64, pair_ratios: &[f64], kappa: f64) -> Vec<f64> {
    let n = betas.len();
    if n < 3 || pair_ratios.len() + 1 < n {
        return betas.to_vec();
    }

    let temperatures: Vec<f64> = betas.iter().map(|beta| 1.0 / beta).collect();
    let mut gaps: Vec<f64> = (0..n - 2)
        .map(|i| {
            let factor = (kappa * (pair_ratios[i] - pair_ratios[i + 1])).exp();
            (temperatures[i + 1] - temperatures[i]) * factor
        })
        .collect();
    if gaps.iter().any(|gap| !gap.is_finite() || *gap <= 0.0) {
        return betas.to_vec();
    }

    let min_gap = MIN_GAP_FRACTION * (t_max - 1.0) / (n - 1) as f64;
    for gap in gaps.iter_mut() {
        *gap = gap.max(min_gap);
    }

    let ceiling = t_max * (1.0 - LADDER_TOLERANCE);
    let top: f64 = 1.0 + gaps.iter().sum::<f64>();
    if !top.is_finite() {
        return betas.to_vec();
    }
    if top >= ceiling {
        // Shrink only the part of each gap above the floor.
        let target = (t_max - 1.0) * (n - 2) as f64 / (n - 1) as f64;
        let floor_total = min_gap * (n - 2) as f64;
        let scale = (target - floor_total) / (top - 1.0 - floor_total);
        for gap in gaps.iter_mut() {
            *gap = min_gap + (*gap - min_gap) * scale;
        }
    }

    let mut adapted = Vec::with_capacity(n);
    adapted.push(1.0);
    let mut temperature = 1.0;
    for gap in &gaps {
        temperature += gap;
        adapted.push(1.0 / temperature);
    }
    adapted.push(1.0 / t_max);

    let floor = 1.0 / t_max;
    let valid = adapted.windows(2).all(|pair| pair[1] < pair[0])
        && adapted.iter().all(|beta| beta.is_finite() && *beta >= floor && *beta <= 1.0);
    if valid {
        adapted
    } else {
        betas.to_vec()
    }
}
