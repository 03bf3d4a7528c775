//! Session configuration

use serde::{Deserialize, Serialize};

/// Configuration for one UI session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Token every client message must carry
    pub csrf_token: String,
    /// Enforce `clientMessageId` ordering
    pub validate_sync_ids: bool,
    /// Flush passes allowed before a turn fails
    pub max_flush_passes: usize,
    /// Degrade batch failures into a full resync instead of returning them
    pub production_mode: bool,
    /// Tag of the root element
    pub root_tag: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            csrf_token: String::new(),
            validate_sync_ids: true,
            max_flush_passes: 100,
            production_mode: false,
            root_tag: "body".to_string(),
        }
    }
}

impl SessionConfig {
    /// Config accepting `token`
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            csrf_token: token.into(),
            ..Self::default()
        }
    }
}
