//! Caller-supplied posterior: parameter priors plus log-density callbacks.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{ErrorInfo, PtError};
use crate::types::Sample;

/// Shared log-density callback.
pub type LogDensityFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// Prior support of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamPrior {
    /// Parameter name, used in logs and manifests.
    pub name: String,
    /// Lower bound of the support.
    pub lower: f64,
    /// Upper bound of the support.
    pub upper: f64,
}

impl ParamPrior {
    /// Creates a bounded prior descriptor.
    pub fn new(name: impl Into<String>, lower: f64, upper: f64) -> Self {
        Self {
            name: name.into(),
            lower,
            upper,
        }
    }

    /// Width of the support.
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// True when both bounds are finite and ordered.
    pub fn is_bounded(&self) -> bool {
        self.lower.is_finite() && self.upper.is_finite() && self.upper > self.lower
    }

    /// True when `value` lies inside `[lower, upper]`.
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// The posterior every chain explores: priors plus likelihood and prior callbacks.
#[derive(Clone)]
pub struct Model {
    priors: Vec<ParamPrior>,
    log_likelihood: LogDensityFn,
    log_prior: LogDensityFn,
}

impl Model {
    /// Creates a model from explicit callbacks.
    pub fn new(
        priors: Vec<ParamPrior>,
        log_likelihood: impl Fn(&[f64]) -> f64 + Send + Sync + 'static,
        log_prior: impl Fn(&[f64]) -> f64 + Send + Sync + 'static,
    ) -> Result<Self, PtError> {
        if priors.is_empty() {
            return Err(PtError::InvalidConfig(ErrorInfo::new(
                "model-dim",
                "model needs at least one parameter",
            )));
        }
        Ok(Self {
            priors,
            log_likelihood: Arc::new(log_likelihood),
            log_prior: Arc::new(log_prior),
        })
    }

    /// Creates a model whose prior is uniform over the prior bounds
    /// (zero inside, negative infinity outside).
    pub fn with_uniform_prior(
        priors: Vec<ParamPrior>,
        log_likelihood: impl Fn(&[f64]) -> f64 + Send + Sync + 'static,
    ) -> Result<Self, PtError> {
        let bounds = priors.clone();
        Self::new(priors, log_likelihood, move |point: &[f64]| {
            let inside = point
                .iter()
                .zip(bounds.iter())
                .all(|(value, prior)| prior.contains(*value));
            if inside {
                0.0
            } else {
                f64::NEG_INFINITY
            }
        })
    }

    /// Parameter priors in model order.
    pub fn priors(&self) -> &[ParamPrior] {
        &self.priors
    }

    /// Model dimension.
    pub fn dim(&self) -> usize {
        self.priors.len()
    }

    /// Evaluates the log-likelihood.
    pub fn log_likelihood(&self, point: &[f64]) -> f64 {
        (self.log_likelihood)(point)
    }

    /// Evaluates the log-prior.
    pub fn log_prior(&self, point: &[f64]) -> f64 {
        (self.log_prior)(point)
    }

    /// Evaluates both densities and bundles them with the point.
    pub fn evaluate(&self, point: Vec<f64>) -> Result<Sample, PtError> {
        self.check_dim(&point)?;
        let log_likelihood = self.log_likelihood(&point);
        let log_prior = self.log_prior(&point);
        Ok(Sample::new(point, log_likelihood, log_prior))
    }

    /// Rejects points whose length differs from the model dimension.
    pub fn check_dim(&self, point: &[f64]) -> Result<(), PtError> {
        if point.len() != self.dim() {
            return Err(PtError::InvalidConfig(
                ErrorInfo::new("point-dim", "point length does not match model dimension")
                    .with_context("expected", self.dim())
                    .with_context("found", point.len()),
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("priors", &self.priors)
            .finish_non_exhaustive()
    }
}
