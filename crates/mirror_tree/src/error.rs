//! Tree and transaction log errors

use crate::node::NodeKey;
use mirror_core::{NamespaceId, NamespaceKind, NodeId, NodeRole, TemplateId};
use mirror_reactive::ComputationError;
use thiserror::Error;

/// Errors from tree operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeKey),

    #[error("node {0} belongs to a different tree")]
    ForeignNode(NodeKey),

    #[error("node {0} has been unregistered")]
    NodeUnregistered(NodeKey),

    #[error("node {node} is already registered as {id}")]
    AlreadyRegistered { node: NodeKey, id: NodeId },

    #[error("node {0} is not registered")]
    NotRegistered(NodeKey),

    #[error("node ids are exhausted")]
    IdsExhausted,

    #[error("the root node cannot be unregistered")]
    CannotUnregisterRoot,

    #[error("the root node cannot become a child")]
    RootNotAdoptable,

    #[error("node {0} already has a parent; remove it first")]
    AlreadyHasParent(NodeKey),

    #[error("adding {child} under {parent} would create a cycle")]
    Cycle { parent: NodeKey, child: NodeKey },

    #[error("namespace {ns} is not available for {role} nodes")]
    NamespaceNotAllowed { role: NodeRole, ns: NamespaceId },

    #[error("namespace {ns} is not a {expected:?} namespace")]
    WrongNamespaceKind { ns: NamespaceId, expected: NamespaceKind },

    #[error("index {index} (+{count}) out of bounds for {ns} of length {len}")]
    IndexOutOfBounds {
        ns: NamespaceId,
        index: usize,
        count: usize,
        len: usize,
    },

    #[error("invalid value for {ns}: {reason}")]
    InvalidValue { ns: NamespaceId, reason: &'static str },

    #[error("unknown template {0}")]
    UnknownTemplate(TemplateId),

    #[error("{ns}/{key} cannot be kept server-only")]
    InvalidServerOnlyKey { ns: NamespaceId, key: String },

    #[error("{ns}/{key} already holds values that were sent to the client")]
    ServerOnlyKeyInUse { ns: NamespaceId, key: String },
}

/// Result type for tree operations
pub type TreeResult<T> = Result<T, TreeError>;

impl From<TreeError> for ComputationError {
    fn from(e: TreeError) -> Self {
        ComputationError::new(e.to_string())
    }
}

/// Protocol invariant violations found while building a batch
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("{from} references {target}, which is neither attached nor part of this batch")]
    UnresolvedReference { from: NodeId, target: NodeKey },

    #[error("change references unknown template {0}")]
    UnknownTemplate(TemplateId),

    #[error(transparent)]
    Tree(#[from] TreeError),
}
