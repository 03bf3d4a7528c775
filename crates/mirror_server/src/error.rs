//! Session errors

use mirror_protocol::ProtocolError;
use mirror_reactive::ReactiveError;
use mirror_tree::{BuildError, TreeError};
use thiserror::Error;

/// Errors from a session turn
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("CSRF token mismatch; message rejected")]
    InvalidCsrfToken,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Batch error: {0}")]
    Build(#[from] BuildError),

    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("Reactive error: {0}")]
    Reactive(#[from] ReactiveError),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;
