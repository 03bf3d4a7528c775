//! Undo journal for atomic tree updates
//!
//! While a journal is open the tree saves each node the first time it is
//! mutated. Rolling back puts every saved node back as it was, drops the
//! nodes created since, and restores the tree's dirty order. Unregister
//! listeners of nodes that left the tree are held until commit, so a rolled
//! back removal never reaches them.

use crate::namespace::NamespaceTable;
use crate::node::{NodeKey, NodeState, NodeValue, StateNode, UnregisterListener};
use crate::tracker::ChangeTracker;
use mirror_core::NodeId;
use std::collections::HashMap;

/// A node as it was before its first mutation in the transaction
pub(crate) struct SavedNode {
    id: Option<NodeId>,
    parent: Option<NodeKey>,
    state: NodeState,
    reported: bool,
    server_only: bool,
    namespaces: NamespaceTable<NodeValue>,
    tracker: ChangeTracker,
    listeners: usize,
}

impl SavedNode {
    fn capture(node: &StateNode) -> Self {
        Self {
            id: node.id,
            parent: node.parent,
            state: node.state,
            reported: node.reported,
            server_only: node.server_only,
            namespaces: node.namespaces.clone(),
            tracker: node.tracker.clone(),
            listeners: node.listeners.len(),
        }
    }

    /// Put the saved state back. Listeners registered since are dropped.
    pub fn restore(self, node: &mut StateNode) {
        node.id = self.id;
        node.parent = self.parent;
        node.state = self.state;
        node.reported = self.reported;
        node.server_only = self.server_only;
        node.namespaces = self.namespaces;
        node.tracker = self.tracker;
        node.listeners.truncate(self.listeners);
    }

    /// Id the node is registered under once restored
    pub fn registered_id(&self) -> Option<NodeId> {
        match self.state {
            NodeState::Attached => self.id,
            _ => None,
        }
    }
}

/// Everything needed to undo an open transaction
pub(crate) struct Journal {
    pub saved: HashMap<NodeKey, SavedNode>,
    pub created: Vec<NodeKey>,
    pub discarded: Vec<NodeKey>,
    pub listeners: Vec<(NodeKey, NodeId, Vec<UnregisterListener>)>,
    pub dirty: Vec<NodeKey>,
    pub invalidations: usize,
    pub unregistered: usize,
}

impl Journal {
    pub fn new(dirty: Vec<NodeKey>, invalidations: usize, unregistered: usize) -> Self {
        Self {
            saved: HashMap::new(),
            created: Vec::new(),
            discarded: Vec::new(),
            listeners: Vec::new(),
            dirty,
            invalidations,
            unregistered,
        }
    }

    /// Remember `node` unless it was saved or created earlier
    pub fn save(&mut self, key: NodeKey, node: &StateNode) {
        if !self.created.contains(&key) {
            self.saved.entry(key).or_insert_with(|| SavedNode::capture(node));
        }
    }
}
