//! Replica errors

use crate::dom::DomError;
use mirror_core::{NamespaceId, NamespaceKind, NodeId, NodeRole, TemplateId};
use mirror_protocol::ProtocolError;
use mirror_reactive::ReactiveError;
use thiserror::Error;

/// Errors while replaying a batch or binding it to the DOM.
///
/// Anything raised while applying a batch leaves the replica out of step
/// with the server; the replica asks for a resync afterwards.
#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("node {0} is attached twice")]
    DuplicateAttach(NodeId),

    #[error("{change} targets unknown node {node}")]
    UnknownNode { node: NodeId, change: &'static str },

    #[error("{from} references {target}, which is not part of the tree")]
    UnresolvedReference { from: NodeId, target: NodeId },

    #[error("namespace {ns} is not available for {role} node {node}")]
    NamespaceNotAllowed {
        node: NodeId,
        role: NodeRole,
        ns: NamespaceId,
    },

    #[error("namespace {ns} of {node} is not a {expected:?} namespace")]
    WrongNamespaceKind {
        node: NodeId,
        ns: NamespaceId,
        expected: NamespaceKind,
    },

    #[error("index {index} (+{count}) out of bounds for {ns} of {node} with length {len}")]
    IndexOutOfBounds {
        node: NodeId,
        ns: NamespaceId,
        index: usize,
        count: usize,
        len: usize,
    },

    #[error("unknown template {0}")]
    UnknownTemplate(TemplateId),

    #[error("template-bound node {0} has no template")]
    MissingTemplate(NodeId),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("DOM error: {0}")]
    Dom(#[from] DomError),

    #[error("Reactive error: {0}")]
    Reactive(#[from] ReactiveError),
}

/// Result type for replica operations
pub type ReplicaResult<T> = Result<T, ReplicaError>;
