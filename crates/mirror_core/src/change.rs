//! Change records
//!
//! A change record describes one mutation of one node. The server tracker
//! produces them, the wire codec carries them and the client replicator
//! applies them in batch order.

use crate::id::{NodeId, TemplateId};
use crate::namespace::{NamespaceId, NodeRole};
use crate::value::Value;
use std::fmt;

/// Value carried by a put, insert or replace
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeValue {
    /// Plain data
    Literal(Value),
    /// Reference to another node of the same tree
    Node(NodeId),
    /// Reference to a registered template definition
    Template(TemplateId),
}

impl ChangeValue {
    /// Referenced node, if any
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Self::Node(id) => Some(*id),
            _ => None,
        }
    }

    /// Literal payload, if any
    pub fn as_literal(&self) -> Option<&Value> {
        match self {
            Self::Literal(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this value references a node
    pub fn is_node(&self) -> bool {
        matches!(self, Self::Node(_))
    }
}

impl From<Value> for ChangeValue {
    fn from(v: Value) -> Self {
        Self::Literal(v)
    }
}

impl From<NodeId> for ChangeValue {
    fn from(id: NodeId) -> Self {
        Self::Node(id)
    }
}

/// What happened to the node
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeKind {
    /// Node became part of the replicated tree
    Attach { role: NodeRole },
    /// Node left the tree for good
    Detach,
    /// Map key set
    Put { ns: NamespaceId, key: String, value: ChangeValue },
    /// Map key removed
    Remove { ns: NamespaceId, key: String },
    /// Items inserted before `index`
    ListInsert { ns: NamespaceId, index: usize, items: Vec<ChangeValue> },
    /// `count` items removed starting at `index`
    ListRemove { ns: NamespaceId, index: usize, count: usize },
    /// Item at `index` replaced
    ListReplace { ns: NamespaceId, index: usize, value: ChangeValue },
    /// All items removed
    ListClear { ns: NamespaceId },
}

/// One mutation of one node
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRecord {
    /// Node the change applies to
    pub node: NodeId,
    /// The change itself
    pub kind: ChangeKind,
}

impl ChangeRecord {
    /// Create a record
    pub fn new(node: NodeId, kind: ChangeKind) -> Self {
        Self { node, kind }
    }

    /// Namespace touched by this record, if any
    pub fn namespace(&self) -> Option<NamespaceId> {
        match &self.kind {
            ChangeKind::Attach { .. } | ChangeKind::Detach => None,
            ChangeKind::Put { ns, .. }
            | ChangeKind::Remove { ns, .. }
            | ChangeKind::ListInsert { ns, .. }
            | ChangeKind::ListRemove { ns, .. }
            | ChangeKind::ListReplace { ns, .. }
            | ChangeKind::ListClear { ns } => Some(*ns),
        }
    }

    /// Nodes referenced by the record's value(s), in order
    pub fn referenced_nodes(&self) -> Vec<NodeId> {
        match &self.kind {
            ChangeKind::Put { value, .. } | ChangeKind::ListReplace { value, .. } => {
                value.node_id().into_iter().collect()
            }
            ChangeKind::ListInsert { items, .. } => {
                items.iter().filter_map(ChangeValue::node_id).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Whether this is an attach record
    pub fn is_attach(&self) -> bool {
        matches!(self.kind, ChangeKind::Attach { .. })
    }

    /// Whether this is a detach record
    pub fn is_detach(&self) -> bool {
        matches!(self.kind, ChangeKind::Detach)
    }
}

impl fmt::Display for ChangeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ChangeKind::Attach { role } => write!(f, "{} attach {}", self.node, role),
            ChangeKind::Detach => write!(f, "{} detach", self.node),
            ChangeKind::Put { ns, key, value } => write!(f, "{} put {}.{} = {:?}", self.node, ns, key, value),
            ChangeKind::Remove { ns, key } => write!(f, "{} remove {}.{}", self.node, ns, key),
            ChangeKind::ListInsert { ns, index, items } => {
                write!(f, "{} insert {}[{}] x{}", self.node, ns, index, items.len())
            }
            ChangeKind::ListRemove { ns, index, count } => {
                write!(f, "{} remove {}[{}] x{}", self.node, ns, index, count)
            }
            ChangeKind::ListReplace { ns, index, value } => {
                write!(f, "{} replace {}[{}] = {:?}", self.node, ns, index, value)
            }
            ChangeKind::ListClear { ns } => write!(f, "{} clear {}", self.node, ns),
        }
    }
}
