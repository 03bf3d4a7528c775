//! Identifiers shared by the server and client replicas

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire identifier of an attached node.
///
/// Ids are handed out in increasing order when a node is attached and are
/// never reused after the node detaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    /// Id of the tree root, which is always the first node registered
    pub const ROOT: NodeId = NodeId(1);

    /// Wrap a raw id
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw ID value
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Whether this is the root id
    pub const fn is_root(&self) -> bool {
        self.0 == Self::ROOT.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

/// Identifier of a registered template definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateId(u32);

impl TemplateId {
    /// Wrap a raw id
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Get the raw ID value
    pub const fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "template#{}", self.0)
    }
}
