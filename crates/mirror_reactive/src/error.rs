//! Reactive errors

use crate::graph::ComputationId;
use thiserror::Error;

/// Errors raised by the graph itself
#[derive(Debug, Error)]
pub enum ReactiveError {
    #[error("flush did not settle after {passes} passes")]
    FlushLimitExceeded { passes: usize },

    #[error("unknown computation {0}")]
    UnknownComputation(ComputationId),
}

/// Failure reported by a computation body
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ComputationError(pub String);

impl ComputationError {
    /// Create an error from any message
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for ComputationError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ComputationError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}
