//! Error types and host sentinel codes.

use std::fmt;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, TemporaError>;

/// Errors returned by store and query operations.
///
/// Every variant maps onto one of the sentinel codes the host shows in place
/// of a value (see [`ErrorCode`]). Validation always happens before any store
/// is touched, so an `Err` never leaves a store or query half-updated.
#[derive(Debug, Error)]
pub enum TemporaError {
    /// Wrong number of positional arguments.
    #[error("expected {expected} arguments, got {got}")]
    Args { expected: &'static str, got: usize },

    /// Bad or missing argument.
    #[error("invalid value: {0}")]
    Value(String),

    /// The query ran but produced nothing yet.
    #[error("no result available")]
    NotAvailable,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TemporaError {
    pub(crate) fn value(msg: impl Into<String>) -> Self {
        Self::Value(msg.into())
    }

    /// Sentinel code the host displays for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Args { .. } => ErrorCode::Args,
            Self::NotAvailable => ErrorCode::NotAvailable,
            Self::Value(_) | Self::Config(_) | Self::Json(_) => ErrorCode::Value,
        }
    }
}

/// Sentinel values understood by the host runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Args,
    Value,
    NotAvailable,
    /// Not a failure: a bound was reached and an older item was dropped.
    Limit,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Args => "#ARGS!",
            Self::Value => "#VALUE!",
            Self::NotAvailable => "#N/A",
            Self::Limit => "#LIMIT!",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
