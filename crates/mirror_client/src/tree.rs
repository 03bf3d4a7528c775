//! The derived tree
//!
//! Nodes are keyed by their wire id; references between nodes are plain ids.
//! The tree is only mutated by the replicator (and by property syncs that
//! mirror a user edit), and reports what changed to the binding layer:
//! reactive invalidations and newly added map keys.

use crate::error::{ReplicaError, ReplicaResult};
use mirror_core::{
    ChangeValue, NamespaceId, NamespaceKind, NamespaceSnapshot, NodeId, NodeRole, TreeSnapshot,
    Value,
};
use mirror_reactive::{InvalidationSource, TrackingScope};
use mirror_tree::{Namespace, NamespaceTable, OutOfRange, SourceKey, SpliceOutcome};
use std::collections::HashMap;

/// Reactive source key of the client tree
pub type ClientSource = SourceKey<NodeId>;

/// Tracking scope handed to binding computations
pub type ClientScope = TrackingScope<ClientSource>;

const NO_ITEMS: &[ChangeValue] = &[];

/// A list namespace changed: `removed` left and `added` entered at `index`
#[derive(Debug, Clone, PartialEq)]
pub struct SpliceEvent {
    pub node: NodeId,
    pub ns: NamespaceId,
    pub index: usize,
    pub removed: Vec<ChangeValue>,
    pub added: Vec<ChangeValue>,
}

/// A map key that did not have a value before
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AddedKey {
    pub node: NodeId,
    pub ns: NamespaceId,
    pub key: String,
}

#[derive(Debug, Clone)]
struct ClientNode {
    role: NodeRole,
    namespaces: NamespaceTable<ChangeValue>,
}

/// Client-side replica of the state tree
#[derive(Debug, Default)]
pub struct ClientTree {
    nodes: HashMap<NodeId, ClientNode>,
    invalidations: Vec<ClientSource>,
    added_keys: Vec<AddedKey>,
}

impl ClientTree {
    /// Create an empty tree; the root arrives with the first batch
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `id` is registered
    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn role(&self, id: NodeId) -> Option<NodeRole> {
        self.nodes.get(&id).map(|n| n.role)
    }

    /// Registered ids in ascending order
    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Register a fresh node
    pub fn register(&mut self, id: NodeId, role: NodeRole) -> ReplicaResult<()> {
        if self.nodes.contains_key(&id) {
            return Err(ReplicaError::DuplicateAttach(id));
        }
        self.nodes.insert(
            id,
            ClientNode {
                role,
                namespaces: NamespaceTable::new(),
            },
        );
        Ok(())
    }

    /// Unregister a node, invalidating everything read from it
    pub fn unregister(&mut self, id: NodeId) -> ReplicaResult<()> {
        let node = self.nodes.remove(&id).ok_or(ReplicaError::UnknownNode {
            node: id,
            change: "detach",
        })?;
        for (ns, namespace) in node.namespaces.iter() {
            if let Namespace::Map(map) = namespace {
                for key in map.keys() {
                    self.invalidations.push(SourceKey::property(id, ns, key));
                }
            }
            self.invalidations.push(SourceKey::structure(id, ns));
        }
        Ok(())
    }

    /// Drop every node, e.g. before applying a resync
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.invalidations.clear();
        self.added_keys.clear();
    }

    // ---- reads ----------------------------------------------------------

    /// Value of a map key, untracked
    pub fn get(&self, id: NodeId, ns: NamespaceId, key: &str) -> Option<&ChangeValue> {
        self.nodes.get(&id)?.namespaces.map(ns)?.get(key)
    }

    /// Value of a map key, registering a dependency in `scope`
    pub fn get_tracked(
        &self,
        scope: &mut ClientScope,
        id: NodeId,
        ns: NamespaceId,
        key: &str,
    ) -> Option<&ChangeValue> {
        scope.track(SourceKey::property(id, ns, key));
        self.get(id, ns, key)
    }

    /// Literal value of a map key, untracked
    pub fn literal(&self, id: NodeId, ns: NamespaceId, key: &str) -> Option<&Value> {
        self.get(id, ns, key).and_then(ChangeValue::as_literal)
    }

    /// Keys with a value, in insertion order
    pub fn keys(&self, id: NodeId, ns: NamespaceId) -> Vec<String> {
        self.nodes
            .get(&id)
            .and_then(|n| n.namespaces.map(ns))
            .map(|m| m.keys().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Items of a list namespace, untracked
    pub fn list(&self, id: NodeId, ns: NamespaceId) -> &[ChangeValue] {
        self.nodes
            .get(&id)
            .and_then(|n| n.namespaces.list(ns))
            .map_or(NO_ITEMS, |l| l.items())
    }

    /// Items of a list namespace, registering a dependency on its order
    pub fn list_tracked(&self, scope: &mut ClientScope, id: NodeId, ns: NamespaceId) -> &[ChangeValue] {
        scope.track(SourceKey::structure(id, ns));
        self.list(id, ns)
    }

    // ---- writes ---------------------------------------------------------

    /// Set a map key
    pub fn put(
        &mut self,
        id: NodeId,
        ns: NamespaceId,
        key: &str,
        value: ChangeValue,
    ) -> ReplicaResult<()> {
        let node = self.namespaces_mut(id, ns, NamespaceKind::Map, "put")?;
        let Some(map) = node.map_mut(ns) else {
            return Err(wrong_kind(id, ns, NamespaceKind::Map));
        };
        if map.get(key) == Some(&value) {
            return Ok(());
        }
        let added = map.insert(key, value).is_none();

        self.invalidations.push(SourceKey::property(id, ns, key));
        if added {
            self.invalidations.push(SourceKey::structure(id, ns));
            self.added_keys.push(AddedKey {
                node: id,
                ns,
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Remove a map key, returning its value
    pub fn remove(&mut self, id: NodeId, ns: NamespaceId, key: &str) -> ReplicaResult<Option<ChangeValue>> {
        let node = self.namespaces_mut(id, ns, NamespaceKind::Map, "remove")?;
        let removed = node.map_mut(ns).and_then(|m| m.remove(key));
        if removed.is_some() {
            self.invalidations.push(SourceKey::property(id, ns, key));
            self.invalidations.push(SourceKey::structure(id, ns));
        }
        Ok(removed)
    }

    /// Remove `count` items at `index` and insert `items` there
    pub fn splice(
        &mut self,
        id: NodeId,
        ns: NamespaceId,
        index: usize,
        count: usize,
        items: Vec<ChangeValue>,
    ) -> ReplicaResult<SpliceOutcome<ChangeValue>> {
        let node = self.namespaces_mut(id, ns, NamespaceKind::List, "splice")?;
        let Some(list) = node.list_mut(ns) else {
            return Err(wrong_kind(id, ns, NamespaceKind::List));
        };
        let outcome = list
            .splice(index, count, items)
            .map_err(|e| out_of_range(id, ns, e))?;
        self.invalidations.push(SourceKey::structure(id, ns));
        Ok(outcome)
    }

    /// Replace the item at `index`, returning the old one
    pub fn replace(
        &mut self,
        id: NodeId,
        ns: NamespaceId,
        index: usize,
        value: ChangeValue,
    ) -> ReplicaResult<ChangeValue> {
        let node = self.namespaces_mut(id, ns, NamespaceKind::List, "replace")?;
        let Some(list) = node.list_mut(ns) else {
            return Err(wrong_kind(id, ns, NamespaceKind::List));
        };
        let old = list.replace(index, value).map_err(|e| out_of_range(id, ns, e))?;
        self.invalidations.push(SourceKey::structure(id, ns));
        Ok(old)
    }

    /// Remove every item, returning them
    pub fn clear_list(&mut self, id: NodeId, ns: NamespaceId) -> ReplicaResult<Vec<ChangeValue>> {
        let node = self.namespaces_mut(id, ns, NamespaceKind::List, "clear")?;
        let removed = node.list_mut(ns).map(|l| l.clear()).unwrap_or_default();
        self.invalidations.push(SourceKey::structure(id, ns));
        Ok(removed)
    }

    // ---- reporting ------------------------------------------------------

    /// Map keys that gained a value since the previous call
    pub fn take_added_keys(&mut self) -> Vec<AddedKey> {
        std::mem::take(&mut self.added_keys)
    }

    /// Sources mutated since the previous call
    pub fn take_invalidations(&mut self) -> Vec<ClientSource> {
        std::mem::take(&mut self.invalidations)
    }

    /// Wire-level picture of the replica
    pub fn snapshot(&self) -> TreeSnapshot {
        let mut snapshot = TreeSnapshot::new();
        for (id, node) in &self.nodes {
            let namespaces = node.namespaces.iter().map(|(ns, namespace)| {
                let contents = match namespace {
                    Namespace::Map(map) => NamespaceSnapshot::Map(
                        map.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
                    ),
                    Namespace::List(list) => NamespaceSnapshot::List(list.items().to_vec()),
                };
                (ns, contents)
            });
            snapshot.insert(*id, node.role, namespaces);
        }
        snapshot
    }

    fn namespaces_mut(
        &mut self,
        id: NodeId,
        ns: NamespaceId,
        expected: NamespaceKind,
        change: &'static str,
    ) -> ReplicaResult<&mut NamespaceTable<ChangeValue>> {
        let node = self
            .nodes
            .get_mut(&id)
            .ok_or(ReplicaError::UnknownNode { node: id, change })?;
        if !node.role.allows(ns) {
            return Err(ReplicaError::NamespaceNotAllowed {
                node: id,
                role: node.role,
                ns,
            });
        }
        if ns.kind() != expected {
            return Err(wrong_kind(id, ns, expected));
        }
        Ok(&mut node.namespaces)
    }
}

impl InvalidationSource<ClientSource> for ClientTree {
    fn drain_invalidations(&mut self) -> Vec<ClientSource> {
        self.take_invalidations()
    }
}

fn wrong_kind(node: NodeId, ns: NamespaceId, expected: NamespaceKind) -> ReplicaError {
    ReplicaError::WrongNamespaceKind { node, ns, expected }
}

fn out_of_range(node: NodeId, ns: NamespaceId, e: OutOfRange) -> ReplicaError {
    ReplicaError::IndexOutOfBounds {
        node,
        ns,
        index: e.index,
        count: e.remove_count,
        len: e.len,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROPS: NamespaceId = NamespaceId::ElementProperties;
    const CLASSES: NamespaceId = NamespaceId::ClassList;

    fn literal(s: &str) -> ChangeValue {
        ChangeValue::Literal(Value::from(s))
    }

    #[test]
    fn test_put_reports_added_keys_once() {
        let mut tree = ClientTree::new();
        tree.register(NodeId::ROOT, NodeRole::Element).unwrap();
        tree.put(NodeId::ROOT, PROPS, "value", literal("a")).unwrap();
        tree.put(NodeId::ROOT, PROPS, "value", literal("b")).unwrap();
        assert_eq!(tree.take_added_keys().len(), 1);
        assert_eq!(tree.literal(NodeId::ROOT, PROPS, "value"), Some(&Value::from("b")));
        assert!(tree.take_invalidations().contains(&SourceKey::structure(NodeId::ROOT, PROPS)));
    }

    #[test]
    fn test_role_restricts_namespaces() {
        let mut tree = ClientTree::new();
        tree.register(NodeId::new(2), NodeRole::Text).unwrap();
        assert!(matches!(
            tree.put(NodeId::new(2), PROPS, "value", literal("x")),
            Err(ReplicaError::NamespaceNotAllowed { .. })
        ));
        assert!(matches!(
            tree.register(NodeId::new(2), NodeRole::Text),
            Err(ReplicaError::DuplicateAttach(_))
        ));
    }

    #[test]
    fn test_splice_scenario() {
        let mut tree = ClientTree::new();
        tree.register(NodeId::ROOT, NodeRole::Element).unwrap();
        tree.splice(NodeId::ROOT, CLASSES, 0, 0, vec![literal("a"), literal("b"), literal("c")])
            .unwrap();
        let outcome = tree
            .splice(NodeId::ROOT, CLASSES, 1, 1, vec![literal("x"), literal("y")])
            .unwrap();
        assert_eq!(outcome.removed, vec![literal("b")]);
        assert_eq!(
            tree.list(NodeId::ROOT, CLASSES),
            &[literal("a"), literal("x"), literal("y"), literal("c")]
        );
        assert!(matches!(
            tree.splice(NodeId::ROOT, CLASSES, 9, 0, vec![]),
            Err(ReplicaError::IndexOutOfBounds { len: 4, .. })
        ));
    }
}
