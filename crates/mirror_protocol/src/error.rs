//! Protocol errors

use mirror_core::NodeId;
use thiserror::Error;

/// Errors from encoding or decoding wire messages
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown change type '{0}'")]
    UnknownChangeType(String),

    #[error("{change} change for {node} is missing '{field}'")]
    MissingField {
        node: NodeId,
        change: &'static str,
        field: &'static str,
    },

    #[error("{change} change for {node} carries an invalid node reference")]
    InvalidNodeReference { node: NodeId, change: &'static str },

    #[error("message id {0} leaves no room for a successor")]
    SequenceExhausted(u64),

    #[error("{change} change for {node} carries an invalid value: {reason}")]
    InvalidValue {
        node: NodeId,
        change: &'static str,
        reason: &'static str,
    },
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
