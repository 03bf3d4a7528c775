//! Namespace and property handles
//!
//! Thin borrowing views over [`StateTree`] that fix the node and namespace so
//! call sites read like plain collection code:
//!
//! ```text
//! tree.map_namespace(input, NamespaceId::ElementProperties)?
//!     .property("value")
//!     .set_value("hi")?;
//! ```

use crate::error::{TreeError, TreeResult};
use crate::namespace::SpliceOutcome;
use crate::node::{NodeKey, NodeValue};
use crate::tree::{StateTree, TreeScope};
use mirror_core::{NamespaceId, NamespaceKind};

impl StateTree {
    /// Mutation handle for a map namespace of `key`
    pub fn map_namespace(&mut self, key: NodeKey, ns: NamespaceId) -> TreeResult<MapHandle<'_>> {
        check_shape(self, key, ns, NamespaceKind::Map)?;
        Ok(MapHandle { tree: self, key, ns })
    }

    /// Mutation handle for a list namespace of `key`
    pub fn list_namespace(&mut self, key: NodeKey, ns: NamespaceId) -> TreeResult<ListHandle<'_>> {
        check_shape(self, key, ns, NamespaceKind::List)?;
        Ok(ListHandle { tree: self, key, ns })
    }
}

fn check_shape(tree: &StateTree, key: NodeKey, ns: NamespaceId, kind: NamespaceKind) -> TreeResult<()> {
    let role = tree.role(key)?;
    if !role.allows(ns) {
        return Err(TreeError::NamespaceNotAllowed { role, ns });
    }
    if ns.kind() != kind {
        return Err(TreeError::WrongNamespaceKind { ns, expected: kind });
    }
    Ok(())
}

/// Handle to one map namespace
pub struct MapHandle<'a> {
    tree: &'a mut StateTree,
    key: NodeKey,
    ns: NamespaceId,
}

impl<'a> MapHandle<'a> {
    /// Node owning the namespace
    pub fn node(&self) -> NodeKey {
        self.key
    }

    /// Handle to one property
    pub fn property(&mut self, name: &str) -> PropertyHandle<'_> {
        PropertyHandle {
            tree: &mut *self.tree,
            key: self.key,
            ns: self.ns,
            name: name.to_string(),
        }
    }

    /// Set a property
    pub fn put(&mut self, name: &str, value: impl Into<NodeValue>) -> TreeResult<bool> {
        self.tree.put(self.key, self.ns, name, value)
    }

    /// Remove a property
    pub fn remove(&mut self, name: &str) -> TreeResult<Option<NodeValue>> {
        self.tree.remove(self.key, self.ns, name)
    }

    /// Current value of a property, untracked
    pub fn get(&self, name: &str) -> TreeResult<Option<&NodeValue>> {
        self.tree.get(self.key, self.ns, name)
    }

    /// Keys with a value
    pub fn keys(&self) -> TreeResult<Vec<String>> {
        self.tree.keys(self.key, self.ns)
    }
}

/// Handle to one property of a map namespace
pub struct PropertyHandle<'a> {
    tree: &'a mut StateTree,
    key: NodeKey,
    ns: NamespaceId,
    name: String,
}

impl<'a> PropertyHandle<'a> {
    /// Property name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the value; an equal value is a no-op returning `false`
    pub fn set_value(&mut self, value: impl Into<NodeValue>) -> TreeResult<bool> {
        self.tree.put(self.key, self.ns, &self.name, value)
    }

    /// Read the value, registering a dependency in `scope`
    pub fn value(&self, scope: &mut TreeScope) -> TreeResult<Option<&NodeValue>> {
        self.tree.get_tracked(scope, self.key, self.ns, &self.name)
    }

    /// Read the value without registering a dependency
    pub fn peek(&self) -> TreeResult<Option<&NodeValue>> {
        self.tree.get(self.key, self.ns, &self.name)
    }

    /// Whether the property has a value. A null value counts as a value.
    pub fn has_value(&self) -> TreeResult<bool> {
        self.tree.has(self.key, self.ns, &self.name)
    }

    /// Remove the value
    pub fn remove(&mut self) -> TreeResult<Option<NodeValue>> {
        self.tree.remove(self.key, self.ns, &self.name)
    }
}

/// Handle to one list namespace
pub struct ListHandle<'a> {
    tree: &'a mut StateTree,
    key: NodeKey,
    ns: NamespaceId,
}

impl<'a> ListHandle<'a> {
    /// Node owning the namespace
    pub fn node(&self) -> NodeKey {
        self.key
    }

    /// Items, untracked
    pub fn items(&self) -> TreeResult<&[NodeValue]> {
        self.tree.list(self.key, self.ns)
    }

    /// Items, registering a dependency on the list order
    pub fn items_tracked(&self, scope: &mut TreeScope) -> TreeResult<&[NodeValue]> {
        self.tree.list_tracked(scope, self.key, self.ns)
    }

    /// Number of items
    pub fn len(&self) -> TreeResult<usize> {
        self.tree.list_len(self.key, self.ns)
    }

    /// Whether the list is empty
    pub fn is_empty(&self) -> TreeResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove `remove_count` items at `index` and insert `items` there
    pub fn splice(
        &mut self,
        index: usize,
        remove_count: usize,
        items: Vec<NodeValue>,
    ) -> TreeResult<SpliceOutcome<NodeValue>> {
        self.tree.splice(self.key, self.ns, index, remove_count, items)
    }

    /// Append an item
    pub fn push(&mut self, item: impl Into<NodeValue>) -> TreeResult<()> {
        self.tree.push(self.key, self.ns, item)
    }

    /// Insert an item at `index`
    pub fn insert(&mut self, index: usize, item: impl Into<NodeValue>) -> TreeResult<()> {
        self.tree.insert_at(self.key, self.ns, index, item)
    }

    /// Replace the item at `index`
    pub fn set(&mut self, index: usize, item: impl Into<NodeValue>) -> TreeResult<bool> {
        self.tree.set_item(self.key, self.ns, index, item)
    }

    /// Remove the item at `index`
    pub fn remove_at(&mut self, index: usize) -> TreeResult<NodeValue> {
        self.tree.remove_at(self.key, self.ns, index)
    }

    /// Remove every item
    pub fn clear(&mut self) -> TreeResult<Vec<NodeValue>> {
        self.tree.clear_list(self.key, self.ns)
    }
}
