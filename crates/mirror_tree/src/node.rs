//! Nodes of the authoritative tree

use crate::namespace::NamespaceTable;
use crate::tracker::ChangeTracker;
use mirror_core::{NodeId, NodeRole, TemplateId, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity of one tree instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeId(u64);

impl TreeId {
    /// Create a new unique tree ID
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for TreeId {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a node, valid for the lifetime of the node in its own tree.
///
/// Unlike [`NodeId`], a key exists from creation on, also for nodes that are
/// never attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub(crate) tree: TreeId,
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeKey {
    /// Tree the node belongs to
    pub fn tree(&self) -> TreeId {
        self.tree
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key#{}.{}v{}", self.tree.0, self.index, self.generation)
    }
}

/// Value stored in a server namespace
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    /// Plain data
    Literal(Value),
    /// Child node
    Node(NodeKey),
    /// Template reference
    Template(TemplateId),
}

impl NodeValue {
    /// Child node, if any
    pub fn as_node(&self) -> Option<NodeKey> {
        match self {
            Self::Node(key) => Some(*key),
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
}

impl From<Value> for NodeValue {
    fn from(v: Value) -> Self {
        Self::Literal(v)
    }
}

impl From<NodeKey> for NodeValue {
    fn from(key: NodeKey) -> Self {
        Self::Node(key)
    }
}

impl From<TemplateId> for NodeValue {
    fn from(id: TemplateId) -> Self {
        Self::Template(id)
    }
}

impl From<&str> for NodeValue {
    fn from(v: &str) -> Self {
        Self::Literal(Value::from(v))
    }
}

impl From<String> for NodeValue {
    fn from(v: String) -> Self {
        Self::Literal(Value::from(v))
    }
}

impl From<bool> for NodeValue {
    fn from(v: bool) -> Self {
        Self::Literal(Value::from(v))
    }
}

impl From<i64> for NodeValue {
    fn from(v: i64) -> Self {
        Self::Literal(Value::from(v))
    }
}

impl From<f64> for NodeValue {
    fn from(v: f64) -> Self {
        Self::Literal(Value::from(v))
    }
}

/// Lifecycle state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Not part of the replicated tree; no id
    Detached,
    /// Registered under an id and diffable
    Attached,
    /// Left the tree for good
    Unregistered,
}

/// Callback fired once when a node is unregistered
pub type UnregisterListener = Box<dyn FnOnce(NodeId) + Send>;

pub(crate) struct StateNode {
    pub role: NodeRole,
    pub id: Option<NodeId>,
    pub parent: Option<NodeKey>,
    pub state: NodeState,
    /// Whether the client has been sent this node's attach
    pub reported: bool,
    /// Kept off the wire: stored under a server-only key, or below such a node
    pub server_only: bool,
    pub namespaces: NamespaceTable<NodeValue>,
    pub tracker: ChangeTracker,
    pub listeners: Vec<UnregisterListener>,
}

impl StateNode {
    pub fn new(role: NodeRole) -> Self {
        Self {
            role,
            id: None,
            parent: None,
            state: NodeState::Detached,
            reported: false,
            server_only: false,
            namespaces: NamespaceTable::new(),
            tracker: ChangeTracker::default(),
            listeners: Vec::new(),
        }
    }

    /// Whether mutations must be recorded for the next batch
    pub fn is_tracked(&self) -> bool {
        self.state == NodeState::Attached && self.reported
    }

    /// Child nodes referenced from any namespace, in namespace order
    pub fn children(&self) -> Vec<NodeKey> {
        self.namespaces
            .values()
            .into_iter()
            .filter_map(NodeValue::as_node)
            .collect()
    }
}
