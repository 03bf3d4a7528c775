//! Observable tree state
//!
//! A snapshot captures what a replica exposes: every attached node with the
//! contents of its non-empty namespaces. Server and client snapshots taken at
//! the same point of the protocol compare equal.

use crate::change::ChangeValue;
use crate::id::NodeId;
use crate::namespace::{NamespaceId, NodeRole};
use std::collections::BTreeMap;

/// Contents of one namespace
#[derive(Debug, Clone, PartialEq)]
pub enum NamespaceSnapshot {
    /// Map contents, ordered by key
    Map(BTreeMap<String, ChangeValue>),
    /// List contents in list order
    List(Vec<ChangeValue>),
}

impl NamespaceSnapshot {
    /// Whether the namespace holds nothing
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Map(m) => m.is_empty(),
            Self::List(l) => l.is_empty(),
        }
    }
}

/// One attached node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    /// Node role
    pub role: NodeRole,
    /// Non-empty namespaces
    pub namespaces: BTreeMap<NamespaceId, NamespaceSnapshot>,
}

/// Every attached node of a replica
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TreeSnapshot {
    /// Nodes by id
    pub nodes: BTreeMap<NodeId, NodeSnapshot>,
}

impl TreeSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a node; empty namespaces are dropped
    pub fn insert(
        &mut self,
        id: NodeId,
        role: NodeRole,
        namespaces: impl IntoIterator<Item = (NamespaceId, NamespaceSnapshot)>,
    ) {
        let namespaces = namespaces
            .into_iter()
            .filter(|(_, ns)| !ns.is_empty())
            .collect();
        self.nodes.insert(id, NodeSnapshot { role, namespaces });
    }

    /// Number of nodes
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the snapshot has no nodes
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Ids present in one snapshot but not the other, or present in both with different state
    pub fn differing_nodes(&self, other: &TreeSnapshot) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(id, node)| other.nodes.get(*id) != Some(*node))
            .map(|(id, _)| *id)
            .collect();
        ids.extend(other.nodes.keys().filter(|id| !self.nodes.contains_key(*id)));
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_empty_namespaces_dropped() {
        let mut snapshot = TreeSnapshot::new();
        snapshot.insert(
            NodeId::ROOT,
            NodeRole::Element,
            [
                (NamespaceId::ElementChildren, NamespaceSnapshot::List(Vec::new())),
                (
                    NamespaceId::ElementData,
                    NamespaceSnapshot::Map(
                        [("tag".to_string(), ChangeValue::Literal(Value::from("body")))]
                            .into_iter()
                            .collect(),
                    ),
                ),
            ],
        );
        let node = &snapshot.nodes[&NodeId::ROOT];
        assert_eq!(node.namespaces.len(), 1);
        assert!(node.namespaces.contains_key(&NamespaceId::ElementData));
    }

    #[test]
    fn test_differing_nodes() {
        let mut a = TreeSnapshot::new();
        a.insert(NodeId::new(1), NodeRole::Element, []);
        a.insert(NodeId::new(2), NodeRole::Text, []);
        let mut b = TreeSnapshot::new();
        b.insert(NodeId::new(1), NodeRole::Element, []);
        b.insert(NodeId::new(3), NodeRole::Text, []);
        assert_eq!(a.differing_nodes(&b), vec![NodeId::new(2), NodeId::new(3)]);
        assert!(a.differing_nodes(&a).is_empty());
    }
}
