//! Client configuration

use serde::{Deserialize, Serialize};

/// Configuration for a client replica
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Token echoed in every outgoing message
    pub csrf_token: String,
    /// Early server messages held while waiting for a missing one
    pub max_pending_messages: usize,
    /// Flush passes allowed for the binding computations
    pub max_flush_passes: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            csrf_token: String::new(),
            max_pending_messages: 16,
            max_flush_passes: 100,
        }
    }
}

impl ClientConfig {
    /// Default configuration echoing `token`
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            csrf_token: token.into(),
            ..Self::default()
        }
    }
}
