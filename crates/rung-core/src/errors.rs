//! Structured error types shared across rung crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured payload attached to every [`PtError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (chain index, iteration, path, ...).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the sampler.
///
/// Configuration problems surface as [`PtError::InvalidConfig`] before any
/// worker thread starts. The remaining families describe failures observed
/// while the chains are running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum PtError {
    /// Bad run parameters or malformed resume data.
    #[error("invalid configuration: {0}")]
    InvalidConfig(ErrorInfo),
    /// A chain kernel failed (or panicked) while stepping or adapting.
    #[error("worker failure: {0}")]
    WorkerFailure(ErrorInfo),
    /// A peer, the exchange coordinator or the ladder adapter hung up.
    #[error("channel closed: {0}")]
    ChannelClosed(ErrorInfo),
    /// A bounded wait on a peer expired.
    #[error("timeout: {0}")]
    Timeout(ErrorInfo),
    /// The run was cancelled cooperatively after another task failed.
    #[error("cancelled: {0}")]
    Cancelled(ErrorInfo),
    /// Filesystem errors raised by checkpoint and manifest I/O.
    #[error("io error: {0}")]
    Io(ErrorInfo),
    /// Serialization and parsing errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl PtError {
    /// Shorthand for an [`PtError::InvalidConfig`] without context.
    pub fn invalid_config(code: impl Into<String>, message: impl Into<String>) -> Self {
        PtError::InvalidConfig(ErrorInfo::new(code, message))
    }

    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            PtError::InvalidConfig(info)
            | PtError::WorkerFailure(info)
            | PtError::ChannelClosed(info)
            | PtError::Timeout(info)
            | PtError::Cancelled(info)
            | PtError::Io(info)
            | PtError::Serde(info) => info,
        }
    }

    /// Returns the stable family name used in logs and manifests.
    pub fn family(&self) -> &'static str {
        match self {
            PtError::InvalidConfig(_) => "invalid-config",
            PtError::WorkerFailure(_) => "worker-failure",
            PtError::ChannelClosed(_) => "channel-closed",
            PtError::Timeout(_) => "timeout",
            PtError::Cancelled(_) => "cancelled",
            PtError::Io(_) => "io",
            PtError::Serde(_) => "serde",
        }
    }

    /// True for errors that were caused by another task failing first.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PtError::Cancelled(_))
    }
}
