//! The authoritative state tree
//!
//! ## Architecture
//!
//! ```text
//!            StateTree
//!   ┌──────────────────────────────┐
//!   │ Arena<StateNode>             │  nodes, addressed by NodeKey
//!   │ HashMap<NodeId, NodeKey>     │  registered (attached) nodes
//!   │ dirty: Vec<NodeKey>          │  nodes with pending changes, first-touch order
//!   │ invalidations: Vec<Source>   │  drained by the reactive flush
//!   │ TemplateRegistry             │
//!   └──────────────────────────────┘
//! ```
//!
//! Every mutation goes through the tree so that parent links, attach/detach
//! side effects, change tracking and reactive invalidation happen in one place.
//! A mutation is validated completely before anything changes; a failed call
//! leaves the tree untouched.

use crate::arena::{Arena, ArenaKey};
use crate::error::{TreeError, TreeResult};
use crate::journal::Journal;
use crate::namespace::{Namespace, OutOfRange, SpliceOutcome};
use crate::node::{NodeKey, NodeState, NodeValue, StateNode, TreeId, UnregisterListener};
use crate::source::SourceKey;
use crate::templates::TemplateRegistry;
use crate::tracker::{full_state, NodeChange};
use mirror_core::{
    ChangeValue, NamespaceId, NamespaceKind, NamespaceSnapshot, NodeId, NodeRole,
    TemplateDefinition, TemplateId, TreeSnapshot, Value, TAG_KEY, TEMPLATE_KEY, TEXT_KEY,
};
use mirror_reactive::{InvalidationSource, TrackingScope};
use std::collections::{HashMap, HashSet};

/// Reactive source key of the server tree
pub type TreeSource = SourceKey<NodeKey>;

/// Tracking scope handed to server-side computations
pub type TreeScope = TrackingScope<TreeSource>;

const NO_ITEMS: &[NodeValue] = &[];

/// Configuration for a new tree
#[derive(Debug, Clone)]
pub struct TreeConfig {
    /// Tag written into the root element's data namespace
    pub root_tag: String,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            root_tag: "body".to_string(),
        }
    }
}

/// Server-side UI state tree
pub struct StateTree {
    id: TreeId,
    nodes: Arena<StateNode>,
    registry: HashMap<NodeId, NodeKey>,
    last_id: u32,
    root: NodeKey,
    dirty: Vec<NodeKey>,
    dirty_set: HashSet<NodeKey>,
    invalidations: Vec<TreeSource>,
    unregistered: Vec<(NodeKey, NodeId)>,
    templates: TemplateRegistry,
    server_only_keys: HashSet<(NamespaceId, String)>,
    journal: Option<Journal>,
}

impl StateTree {
    /// Create a tree whose root element is already attached as [`NodeId::ROOT`]
    pub fn new(config: TreeConfig) -> Self {
        let id = TreeId::new();
        let mut nodes = Arena::new();

        let mut root_node = StateNode::new(NodeRole::Element);
        root_node.id = Some(NodeId::ROOT);
        root_node.state = NodeState::Attached;
        if let Some(data) = root_node.namespaces.map_mut(NamespaceId::ElementData) {
            data.insert(TAG_KEY, NodeValue::from(config.root_tag));
        }
        let slot = nodes.insert(root_node);
        let root = NodeKey {
            tree: id,
            index: slot.index(),
            generation: slot.generation(),
        };

        let mut tree = Self {
            id,
            nodes,
            registry: HashMap::new(),
            last_id: NodeId::ROOT.raw(),
            root,
            dirty: Vec::new(),
            dirty_set: HashSet::new(),
            invalidations: Vec::new(),
            unregistered: Vec::new(),
            templates: TemplateRegistry::new(),
            server_only_keys: HashSet::new(),
            journal: None,
        };
        tree.registry.insert(NodeId::ROOT, root);
        tree.mark_dirty(root);
        tree
    }

    /// Identity of this tree
    pub fn id(&self) -> TreeId {
        self.id
    }

    /// The root element
    pub fn root(&self) -> NodeKey {
        self.root
    }

    /// Number of nodes held by the arena, attached or not
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of registered nodes
    pub fn registered_count(&self) -> usize {
        self.registry.len()
    }

    /// Whether `key` names a live node of this tree
    pub fn contains(&self, key: NodeKey) -> bool {
        self.slot(key).is_ok()
    }

    // ---- creation -------------------------------------------------------

    /// Create a detached node
    pub fn create_node(&mut self, role: NodeRole) -> NodeKey {
        self.insert_node(StateNode::new(role))
    }

    /// Create a detached element with its tag set
    pub fn create_element(&mut self, tag: &str) -> NodeKey {
        let mut node = StateNode::new(NodeRole::Element);
        if let Some(data) = node.namespaces.map_mut(NamespaceId::ElementData) {
            data.insert(TAG_KEY, NodeValue::from(tag));
        }
        self.insert_node(node)
    }

    /// Create a detached text node
    pub fn create_text(&mut self, text: &str) -> NodeKey {
        let mut node = StateNode::new(NodeRole::Text);
        if let Some(data) = node.namespaces.map_mut(NamespaceId::TextNode) {
            data.insert(TEXT_KEY, NodeValue::from(text));
        }
        self.insert_node(node)
    }

    /// Create a detached node bound to a registered template
    pub fn create_template_node(&mut self, template: TemplateId) -> TreeResult<NodeKey> {
        if !self.templates.contains(template) {
            return Err(TreeError::UnknownTemplate(template));
        }
        let mut node = StateNode::new(NodeRole::TemplateBound);
        if let Some(binding) = node.namespaces.map_mut(NamespaceId::TemplateBinding) {
            binding.insert(TEMPLATE_KEY, NodeValue::Template(template));
        }
        Ok(self.insert_node(node))
    }

    /// Drop a detached node that was never attached, together with its
    /// detached descendants
    pub fn discard_node(&mut self, key: NodeKey) -> TreeResult<()> {
        let node = self.slot(key)?;
        match (node.state, node.id) {
            (NodeState::Attached, Some(id)) => {
                return Err(TreeError::AlreadyRegistered { node: key, id })
            }
            (NodeState::Detached, _) => {}
            _ => return Err(TreeError::NodeUnregistered(key)),
        }
        if node.parent.is_some() {
            return Err(TreeError::AlreadyHasParent(key));
        }
        let order = self.subtree_pre_order(key)?;
        match self.journal.as_mut() {
            Some(journal) => journal.discarded.extend(order),
            None => {
                for k in order {
                    self.nodes.remove(ArenaKey::new(k.index, k.generation));
                }
            }
        }
        Ok(())
    }

    // ---- registry -------------------------------------------------------

    /// Assign the next id to a detached node and make it diffable.
    ///
    /// Usually called implicitly when a node is placed under an attached
    /// parent; calling it directly attaches a free-standing node.
    pub fn register_node(&mut self, key: NodeKey) -> TreeResult<NodeId> {
        let next = self.last_id.checked_add(1).ok_or(TreeError::IdsExhausted)?;
        let id = NodeId::new(next);
        let node = self.slot_mut(key)?;
        match (node.state, node.id) {
            (NodeState::Attached, Some(id)) => {
                return Err(TreeError::AlreadyRegistered { node: key, id })
            }
            (NodeState::Unregistered, _) => return Err(TreeError::NodeUnregistered(key)),
            _ => {}
        }

        node.id = Some(id);
        node.state = NodeState::Attached;
        node.reported = false;
        node.tracker.clear();

        self.last_id = id.raw();
        self.registry.insert(id, key);
        self.mark_dirty(key);
        log::trace!("Registered {} as {}", key, id);
        Ok(id)
    }

    /// Unregister a node for good. Its descendants are not touched; detaching
    /// through a parent mutation unregisters the whole subtree.
    pub fn unregister_node(&mut self, key: NodeKey) -> TreeResult<()> {
        if key == self.root {
            return Err(TreeError::CannotUnregisterRoot);
        }
        if self.slot(key)?.state != NodeState::Attached {
            return Err(TreeError::NotRegistered(key));
        }
        self.unregister(key)
    }

    /// Registered node with the given id. Never errors.
    pub fn get_node(&self, id: NodeId) -> Option<NodeKey> {
        self.registry.get(&id).copied()
    }

    /// Id of a registered node
    pub fn node_id(&self, key: NodeKey) -> Option<NodeId> {
        let node = self.slot(key).ok()?;
        match node.state {
            NodeState::Attached => node.id,
            _ => None,
        }
    }

    /// Role of a node
    pub fn role(&self, key: NodeKey) -> TreeResult<NodeRole> {
        Ok(self.slot(key)?.role)
    }

    /// Lifecycle state of a node
    pub fn state(&self, key: NodeKey) -> Option<NodeState> {
        self.slot(key).ok().map(|n| n.state)
    }

    /// Whether a node is registered
    pub fn is_attached(&self, key: NodeKey) -> bool {
        self.state(key) == Some(NodeState::Attached)
    }

    /// Parent of a node
    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.slot(key).ok()?.parent
    }

    /// Child nodes held in any namespace of `key`
    pub fn children(&self, key: NodeKey) -> TreeResult<Vec<NodeKey>> {
        Ok(self.slot(key)?.children())
    }

    /// Run `listener` once when `key` gets unregistered
    pub fn add_unregister_listener<F>(&mut self, key: NodeKey, listener: F) -> TreeResult<()>
    where
        F: FnOnce(NodeId) + Send + 'static,
    {
        let node = self.slot_mut(key)?;
        if node.state == NodeState::Unregistered {
            return Err(TreeError::NodeUnregistered(key));
        }
        let listener: UnregisterListener = Box::new(listener);
        node.listeners.push(listener);
        Ok(())
    }

    /// Nodes unregistered since the previous call, bottom-up per subtree
    pub fn take_unregistered(&mut self) -> Vec<(NodeKey, NodeId)> {
        std::mem::take(&mut self.unregistered)
    }

    // ---- atomic updates -------------------------------------------------

    /// Run `f` as one update: if it fails, every change it made to the tree is
    /// undone and unregister listeners of nodes it removed never run.
    ///
    /// A call made while another one is running joins the outer update.
    pub fn atomically<R, E, F>(&mut self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut StateTree) -> Result<R, E>,
    {
        if self.journal.is_some() {
            return f(self);
        }
        self.journal = Some(Journal::new(
            self.dirty.clone(),
            self.invalidations.len(),
            self.unregistered.len(),
        ));
        let result = f(self);
        if result.is_ok() {
            self.commit();
        } else {
            self.rollback();
        }
        result
    }

    fn commit(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        for key in journal.discarded {
            // Adopted again after the discard
            if self.slot(key).map_or(true, |n| n.parent.is_some()) {
                continue;
            }
            self.nodes.remove(ArenaKey::new(key.index, key.generation));
        }
        for (_, id, listeners) in journal.listeners {
            listeners.into_iter().for_each(|listener| listener(id));
        }
    }

    fn rollback(&mut self) {
        let Some(journal) = self.journal.take() else {
            return;
        };
        for key in &journal.created {
            let slot = ArenaKey::new(key.index, key.generation);
            if let Some(StateNode { id: Some(id), .. }) = self.nodes.remove(slot) {
                self.registry.remove(&id);
            }
        }
        for (key, _, listeners) in journal.listeners {
            if let Some(node) = self.nodes.get_mut(ArenaKey::new(key.index, key.generation)) {
                node.listeners = listeners;
            }
        }

        let restored = journal.saved.len();
        for (key, saved) in journal.saved {
            let Some(node) = self.nodes.get_mut(ArenaKey::new(key.index, key.generation)) else {
                continue;
            };
            if let (NodeState::Attached, Some(id)) = (node.state, node.id) {
                self.registry.remove(&id);
            }
            if let Some(id) = saved.registered_id() {
                self.registry.insert(id, key);
            }
            saved.restore(node);
        }

        self.dirty_set = journal.dirty.iter().copied().collect();
        self.dirty = journal.dirty;
        self.invalidations.truncate(journal.invalidations);
        self.unregistered.truncate(journal.unregistered);
        log::debug!(
            "Rolled back {} nodes and dropped {} created ones",
            restored,
            journal.created.len()
        );
    }

    // ---- server-only data -----------------------------------------------

    /// Keep `name` of every `ns` map on the server. Values stored under it
    /// are never sent, and neither are nodes placed there or their
    /// descendants.
    ///
    /// Only free keys of map namespaces qualify: a key some attached node
    /// already holds may have reached the client.
    pub fn mark_server_only_key(&mut self, ns: NamespaceId, name: &str) -> TreeResult<()> {
        if ns.kind() != NamespaceKind::Map || [TAG_KEY, TEXT_KEY, TEMPLATE_KEY].contains(&name) {
            return Err(TreeError::InvalidServerOnlyKey {
                ns,
                key: name.to_string(),
            });
        }
        let in_use = self.nodes.iter().any(|(_, node)| {
            node.state == NodeState::Attached
                && node.namespaces.map(ns).map_or(false, |m| m.get(name).is_some())
        });
        if in_use {
            return Err(TreeError::ServerOnlyKeyInUse {
                ns,
                key: name.to_string(),
            });
        }
        self.server_only_keys.insert((ns, name.to_string()));
        Ok(())
    }

    /// Whether values under `name` stay on the server
    pub fn is_server_only_key(&self, ns: NamespaceId, name: &str) -> bool {
        !self.server_only_keys.is_empty() && self.server_only_keys.contains(&(ns, name.to_string()))
    }

    /// Whether a node is kept off the wire
    pub fn is_server_only(&self, key: NodeKey) -> bool {
        self.slot(key).map_or(false, |n| n.server_only)
    }

    // ---- templates ------------------------------------------------------

    /// Register a template definition; identical definitions share an id
    pub fn register_template(&mut self, definition: TemplateDefinition) -> TemplateId {
        self.templates.register(definition)
    }

    /// Definition of a registered template
    pub fn template(&self, id: TemplateId) -> Option<&TemplateDefinition> {
        self.templates.get(id)
    }

    /// Every registered template
    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    // ---- map namespaces -------------------------------------------------

    /// Value of `name`, untracked
    pub fn get(&self, key: NodeKey, ns: NamespaceId, name: &str) -> TreeResult<Option<&NodeValue>> {
        let node = self.check_namespace(key, ns, NamespaceKind::Map)?;
        Ok(node.namespaces.map(ns).and_then(|m| m.get(name)))
    }

    /// Value of `name`, registering a dependency in `scope`
    pub fn get_tracked(
        &self,
        scope: &mut TreeScope,
        key: NodeKey,
        ns: NamespaceId,
        name: &str,
    ) -> TreeResult<Option<&NodeValue>> {
        scope.track(SourceKey::property(key, ns, name));
        self.get(key, ns, name)
    }

    /// Literal value of `name`, tracked
    pub fn literal_tracked(
        &self,
        scope: &mut TreeScope,
        key: NodeKey,
        ns: NamespaceId,
        name: &str,
    ) -> TreeResult<Option<&Value>> {
        Ok(self
            .get_tracked(scope, key, ns, name)?
            .and_then(NodeValue::as_literal))
    }

    /// Whether `name` has a value (a null value still counts)
    pub fn has(&self, key: NodeKey, ns: NamespaceId, name: &str) -> TreeResult<bool> {
        Ok(self.get(key, ns, name)?.is_some())
    }

    /// Keys with a value, in insertion order
    pub fn keys(&self, key: NodeKey, ns: NamespaceId) -> TreeResult<Vec<String>> {
        let node = self.check_namespace(key, ns, NamespaceKind::Map)?;
        Ok(node
            .namespaces
            .map(ns)
            .map(|m| m.keys().map(str::to_string).collect())
            .unwrap_or_default())
    }

    /// Keys with a value, registering a dependency on the key set
    pub fn keys_tracked(
        &self,
        scope: &mut TreeScope,
        key: NodeKey,
        ns: NamespaceId,
    ) -> TreeResult<Vec<String>> {
        scope.track(SourceKey::structure(key, ns));
        self.keys(key, ns)
    }

    /// Set `name` to `value`. Returns `false` when the value was already equal.
    pub fn put(
        &mut self,
        key: NodeKey,
        ns: NamespaceId,
        name: &str,
        value: impl Into<NodeValue>,
    ) -> TreeResult<bool> {
        let value = value.into();
        let current = self
            .check_writable(key, ns, NamespaceKind::Map)?
            .namespaces
            .map(ns)
            .and_then(|m| m.get(name))
            .cloned();
        if current.as_ref() == Some(&value) {
            return Ok(false);
        }
        self.check_value(key, ns, Some(name), &value)?;

        let node = self.slot_mut(key)?;
        if node.is_tracked() {
            node.tracker.touch_key(ns, name, current.as_ref());
        }
        let map = node
            .namespaces
            .map_mut(ns)
            .ok_or(TreeError::WrongNamespaceKind {
                ns,
                expected: NamespaceKind::Map,
            })?;
        map.insert(name, value.clone());
        if node.state == NodeState::Attached {
            self.mark_dirty(key);
        }

        if let Some(NodeValue::Node(old)) = &current {
            self.release_child(*old)?;
        }
        if let NodeValue::Node(child) = value {
            let hidden = self.is_server_only_key(ns, name);
            self.adopt_child(key, child, hidden)?;
        }
        self.invalidations.push(SourceKey::property(key, ns, name));
        if current.is_none() {
            self.invalidations.push(SourceKey::structure(key, ns));
        }
        Ok(true)
    }

    /// Store a property value the client already holds.
    ///
    /// Works like [`put`](Self::put), but the stored value also becomes the
    /// key's baseline for the next batch: the key is sent back only if the
    /// turn ends on a different value.
    pub fn put_synced(
        &mut self,
        key: NodeKey,
        ns: NamespaceId,
        name: &str,
        value: Value,
    ) -> TreeResult<bool> {
        let changed = self.put(key, ns, name, value.clone())?;
        let node = self.slot_mut(key)?;
        if node.is_tracked() {
            node.tracker.rebase_key(ns, name, NodeValue::Literal(value));
        }
        Ok(changed)
    }

    /// Remove `name`, returning its previous value
    pub fn remove(
        &mut self,
        key: NodeKey,
        ns: NamespaceId,
        name: &str,
    ) -> TreeResult<Option<NodeValue>> {
        let node = self.check_writable(key, ns, NamespaceKind::Map)?;
        let Some(current) = node.namespaces.map(ns).and_then(|m| m.get(name)).cloned() else {
            return Ok(None);
        };

        let node = self.slot_mut(key)?;
        if node.is_tracked() {
            node.tracker.touch_key(ns, name, Some(&current));
        }
        if let Some(map) = node.namespaces.map_mut(ns) {
            map.remove(name);
        }
        if node.state == NodeState::Attached {
            self.mark_dirty(key);
        }

        if let NodeValue::Node(old) = current {
            self.release_child(old)?;
        }
        self.invalidations.push(SourceKey::property(key, ns, name));
        self.invalidations.push(SourceKey::structure(key, ns));
        Ok(Some(current))
    }

    // ---- list namespaces ------------------------------------------------

    /// Items of a list namespace, untracked
    pub fn list(&self, key: NodeKey, ns: NamespaceId) -> TreeResult<&[NodeValue]> {
        let node = self.check_namespace(key, ns, NamespaceKind::List)?;
        Ok(node.namespaces.list(ns).map_or(NO_ITEMS, |l| l.items()))
    }

    /// Items of a list namespace, registering a dependency on its order
    pub fn list_tracked(
        &self,
        scope: &mut TreeScope,
        key: NodeKey,
        ns: NamespaceId,
    ) -> TreeResult<&[NodeValue]> {
        scope.track(SourceKey::structure(key, ns));
        self.list(key, ns)
    }

    /// Number of items in a list namespace
    pub fn list_len(&self, key: NodeKey, ns: NamespaceId) -> TreeResult<usize> {
        Ok(self.list(key, ns)?.len())
    }

    /// Remove `remove_count` items at `index` and insert `items` in their place
    pub fn splice(
        &mut self,
        key: NodeKey,
        ns: NamespaceId,
        index: usize,
        remove_count: usize,
        items: Vec<NodeValue>,
    ) -> TreeResult<SpliceOutcome<NodeValue>> {
        let node = self.check_writable(key, ns, NamespaceKind::List)?;
        let len = node.namespaces.list(ns).map_or(0, |l| l.len());
        let fits = index
            .checked_add(remove_count)
            .map_or(false, |end| end <= len);
        if !fits {
            return Err(TreeError::IndexOutOfBounds {
                ns,
                index,
                count: remove_count,
                len,
            });
        }

        let mut adopted = HashSet::new();
        for item in &items {
            self.check_value(key, ns, None, item)?;
            if let NodeValue::Node(child) = item {
                if !adopted.insert(*child) {
                    return Err(TreeError::AlreadyHasParent(*child));
                }
            }
        }
        if remove_count == 0 && items.is_empty() {
            return Ok(SpliceOutcome {
                index,
                removed: Vec::new(),
                added: Vec::new(),
            });
        }

        let node = self.slot_mut(key)?;
        let outcome = node
            .namespaces
            .list_mut(ns)
            .ok_or(TreeError::WrongNamespaceKind {
                ns,
                expected: NamespaceKind::List,
            })?
            .splice(index, remove_count, items)
            .map_err(|e| out_of_range(ns, e))?;
        if node.is_tracked() {
            for _ in 0..remove_count {
                node.tracker.remove(ns, index);
            }
            node.tracker.insert(ns, index, outcome.added.clone());
        }
        if node.state == NodeState::Attached {
            self.mark_dirty(key);
        }

        for child in outcome.removed.iter().filter_map(NodeValue::as_node) {
            self.release_child(child)?;
        }
        for child in outcome.added.iter().filter_map(NodeValue::as_node) {
            self.adopt_child(key, child, false)?;
        }
        self.invalidations.push(SourceKey::structure(key, ns));
        Ok(outcome)
    }

    /// Append one item
    pub fn push(&mut self, key: NodeKey, ns: NamespaceId, item: impl Into<NodeValue>) -> TreeResult<()> {
        let len = self.list_len(key, ns)?;
        self.splice(key, ns, len, 0, vec![item.into()])?;
        Ok(())
    }

    /// Insert one item at `index`
    pub fn insert_at(
        &mut self,
        key: NodeKey,
        ns: NamespaceId,
        index: usize,
        item: impl Into<NodeValue>,
    ) -> TreeResult<()> {
        self.splice(key, ns, index, 0, vec![item.into()])?;
        Ok(())
    }

    /// Remove the item at `index`, returning it
    pub fn remove_at(&mut self, key: NodeKey, ns: NamespaceId, index: usize) -> TreeResult<NodeValue> {
        let outcome = self.splice(key, ns, index, 1, Vec::new())?;
        outcome
            .removed
            .into_iter()
            .next()
            .ok_or(TreeError::IndexOutOfBounds {
                ns,
                index,
                count: 1,
                len: 0,
            })
    }

    /// Replace the item at `index`. Returns `false` when it was already equal.
    pub fn set_item(
        &mut self,
        key: NodeKey,
        ns: NamespaceId,
        index: usize,
        value: impl Into<NodeValue>,
    ) -> TreeResult<bool> {
        let value = value.into();
        let node = self.check_writable(key, ns, NamespaceKind::List)?;
        let items = node.namespaces.list(ns).map_or(NO_ITEMS, |l| l.items());
        let Some(current) = items.get(index).cloned() else {
            return Err(TreeError::IndexOutOfBounds {
                ns,
                index,
                count: 1,
                len: items.len(),
            });
        };
        if current == value {
            return Ok(false);
        }
        self.check_value(key, ns, None, &value)?;

        let node = self.slot_mut(key)?;
        if let Some(list) = node.namespaces.list_mut(ns) {
            list.replace(index, value.clone())
                .map_err(|e| out_of_range(ns, e))?;
        }
        if node.is_tracked() {
            node.tracker.replace(ns, index, value.clone());
        }
        if node.state == NodeState::Attached {
            self.mark_dirty(key);
        }

        if let NodeValue::Node(old) = current {
            self.release_child(old)?;
        }
        if let NodeValue::Node(child) = value {
            self.adopt_child(key, child, false)?;
        }
        self.invalidations.push(SourceKey::structure(key, ns));
        Ok(true)
    }

    /// Remove every item, returning them
    pub fn clear_list(&mut self, key: NodeKey, ns: NamespaceId) -> TreeResult<Vec<NodeValue>> {
        let node = self.check_writable(key, ns, NamespaceKind::List)?;
        if node.namespaces.list(ns).map_or(true, |l| l.is_empty()) {
            return Ok(Vec::new());
        }

        let node = self.slot_mut(key)?;
        let removed = node
            .namespaces
            .list_mut(ns)
            .map(|l| l.clear())
            .unwrap_or_default();
        if node.is_tracked() {
            node.tracker.clear_list(ns);
        }
        if node.state == NodeState::Attached {
            self.mark_dirty(key);
        }

        for child in removed.iter().filter_map(NodeValue::as_node) {
            self.release_child(child)?;
        }
        self.invalidations.push(SourceKey::structure(key, ns));
        Ok(removed)
    }

    // ---- change collection ----------------------------------------------

    /// Return and clear the pending changes of one node
    pub fn collect_changes(&mut self, key: NodeKey) -> TreeResult<Vec<NodeChange>> {
        let node = self.slot_mut(key)?;
        let changes = match (node.state, node.reported) {
            (NodeState::Attached, false) => {
                node.tracker.clear();
                node.reported = true;
                let mut changes = vec![NodeChange::Attach { role: node.role }];
                changes.extend(full_state(&node.namespaces));
                changes
            }
            (NodeState::Attached, true) => node.tracker.collect(&node.namespaces),
            (NodeState::Unregistered, true) => {
                node.tracker.clear();
                node.reported = false;
                vec![NodeChange::Detach]
            }
            _ => {
                node.tracker.clear();
                Vec::new()
            }
        };
        Ok(changes)
    }

    /// Whether any node has pending changes
    pub fn has_pending_changes(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Nodes touched since the previous call, in first-touch order
    pub fn take_dirty(&mut self) -> Vec<NodeKey> {
        self.dirty_set.clear();
        std::mem::take(&mut self.dirty)
    }

    /// Reactive sources mutated since the previous call
    pub fn take_invalidations(&mut self) -> Vec<TreeSource> {
        std::mem::take(&mut self.invalidations)
    }

    /// Forget what the client was told: every attached node is re-sent with
    /// its full state by the next batch
    pub fn reset_reporting(&mut self) {
        let keys: Vec<ArenaKey> = self.nodes.iter().map(|(k, _)| k).collect();
        for slot in keys {
            if let Some(node) = self.nodes.get_mut(slot) {
                node.tracker.clear();
                node.reported = false;
            }
        }
        self.purge_unregistered();

        self.dirty.clear();
        self.dirty_set.clear();
        match self.subtree_pre_order(self.root) {
            Ok(order) => order.into_iter().for_each(|key| self.mark_dirty(key)),
            Err(e) => log::error!("Failed to walk the tree for a resync: {}", e),
        }
    }

    /// Drop unregistered nodes whose detach has been collected
    pub(crate) fn purge_unregistered(&mut self) -> usize {
        let dead: Vec<ArenaKey> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.state == NodeState::Unregistered && !n.reported)
            .map(|(k, _)| k)
            .collect();
        for slot in &dead {
            self.nodes.remove(*slot);
        }
        dead.len()
    }

    /// Id a node has or had, also after it was unregistered
    pub(crate) fn wire_id(&self, key: NodeKey) -> Option<NodeId> {
        self.slot(key).ok()?.id
    }

    /// Resolve a value to its wire form; `None` for a node without an id
    pub(crate) fn resolve(&self, value: &NodeValue) -> Option<ChangeValue> {
        match value {
            NodeValue::Literal(v) => Some(ChangeValue::Literal(v.clone())),
            NodeValue::Node(key) => self.node_id(*key).map(ChangeValue::Node),
            NodeValue::Template(id) => Some(ChangeValue::Template(*id)),
        }
    }

    /// Wire-level picture of every attached node the client gets to see
    pub fn snapshot(&self) -> TreeSnapshot {
        let mut snapshot = TreeSnapshot::new();
        for (_, node) in self.nodes.iter() {
            let (NodeState::Attached, Some(id)) = (node.state, node.id) else {
                continue;
            };
            if node.server_only {
                continue;
            }
            let namespaces = node.namespaces.iter().map(|(ns, namespace)| {
                let contents = match namespace {
                    Namespace::Map(map) => NamespaceSnapshot::Map(
                        map.iter()
                            .filter(|(k, _)| !self.is_server_only_key(ns, k))
                            .filter_map(|(k, v)| self.resolve(v).map(|v| (k.to_string(), v)))
                            .collect(),
                    ),
                    Namespace::List(list) => NamespaceSnapshot::List(
                        list.items().iter().filter_map(|v| self.resolve(v)).collect(),
                    ),
                };
                (ns, contents)
            });
            snapshot.insert(id, node.role, namespaces);
        }
        snapshot
    }

    // ---- internals ------------------------------------------------------

    fn key_of(&self, slot: ArenaKey) -> NodeKey {
        NodeKey {
            tree: self.id,
            index: slot.index(),
            generation: slot.generation(),
        }
    }

    fn slot(&self, key: NodeKey) -> TreeResult<&StateNode> {
        if key.tree != self.id {
            return Err(TreeError::ForeignNode(key));
        }
        self.nodes
            .get(ArenaKey::new(key.index, key.generation))
            .ok_or(TreeError::NodeNotFound(key))
    }

    fn slot_mut(&mut self, key: NodeKey) -> TreeResult<&mut StateNode> {
        if key.tree != self.id {
            return Err(TreeError::ForeignNode(key));
        }
        let node = self
            .nodes
            .get_mut(ArenaKey::new(key.index, key.generation))
            .ok_or(TreeError::NodeNotFound(key))?;
        if let Some(journal) = self.journal.as_mut() {
            journal.save(key, node);
        }
        Ok(node)
    }

    fn insert_node(&mut self, node: StateNode) -> NodeKey {
        let slot = self.nodes.insert(node);
        let key = self.key_of(slot);
        if let Some(journal) = self.journal.as_mut() {
            journal.created.push(key);
        }
        key
    }

    fn check_namespace(
        &self,
        key: NodeKey,
        ns: NamespaceId,
        kind: NamespaceKind,
    ) -> TreeResult<&StateNode> {
        let node = self.slot(key)?;
        if !node.role.allows(ns) {
            return Err(TreeError::NamespaceNotAllowed { role: node.role, ns });
        }
        if ns.kind() != kind {
            return Err(TreeError::WrongNamespaceKind { ns, expected: kind });
        }
        Ok(node)
    }

    fn check_writable(
        &self,
        key: NodeKey,
        ns: NamespaceId,
        kind: NamespaceKind,
    ) -> TreeResult<&StateNode> {
        let node = self.check_namespace(key, ns, kind)?;
        if node.state == NodeState::Unregistered {
            return Err(TreeError::NodeUnregistered(key));
        }
        Ok(node)
    }

    fn check_value(
        &self,
        owner: NodeKey,
        ns: NamespaceId,
        name: Option<&str>,
        value: &NodeValue,
    ) -> TreeResult<()> {
        let template_slot = ns == NamespaceId::TemplateBinding && name == Some(TEMPLATE_KEY);
        match value {
            NodeValue::Template(id) => {
                if !template_slot {
                    return Err(TreeError::InvalidValue {
                        ns,
                        reason: "template references belong under the template key",
                    });
                }
                if !self.templates.contains(*id) {
                    return Err(TreeError::UnknownTemplate(*id));
                }
            }
            _ if template_slot => {
                return Err(TreeError::InvalidValue {
                    ns,
                    reason: "the template key only holds template references",
                });
            }
            NodeValue::Node(child) => {
                if !matches!(
                    ns,
                    NamespaceId::ElementChildren
                        | NamespaceId::ElementProperties
                        | NamespaceId::TemplateBinding
                ) {
                    return Err(TreeError::InvalidValue {
                        ns,
                        reason: "namespace does not hold nodes",
                    });
                }
                self.check_adoptable(owner, *child)?;
            }
            NodeValue::Literal(value) => {
                if ns == NamespaceId::ElementChildren {
                    return Err(TreeError::InvalidValue {
                        ns,
                        reason: "children must be nodes",
                    });
                }
                if !value.is_representable() {
                    return Err(TreeError::InvalidValue {
                        ns,
                        reason: "floats must be finite",
                    });
                }
            }
        }
        Ok(())
    }

    fn check_adoptable(&self, parent: NodeKey, child: NodeKey) -> TreeResult<()> {
        if child == self.root {
            return Err(TreeError::RootNotAdoptable);
        }
        let node = self.slot(child)?;
        if node.state == NodeState::Unregistered {
            return Err(TreeError::NodeUnregistered(child));
        }
        if node.parent.is_some() {
            return Err(TreeError::AlreadyHasParent(child));
        }

        let mut cursor = Some(parent);
        while let Some(key) = cursor {
            if key == child {
                return Err(TreeError::Cycle { parent, child });
            }
            cursor = self.slot(key)?.parent;
        }
        Ok(())
    }

    fn adopt_child(&mut self, parent: NodeKey, child: NodeKey, hidden: bool) -> TreeResult<()> {
        let parent_node = self.slot(parent)?;
        let parent_attached = parent_node.state == NodeState::Attached;
        let server_only = parent_node.server_only || hidden;
        self.slot_mut(child)?.parent = Some(parent);
        self.flag_server_only(child, server_only)?;
        if parent_attached {
            for key in self.subtree_pre_order(child)? {
                if self.slot(key)?.state == NodeState::Detached {
                    self.register_node(key)?;
                }
            }
        }
        Ok(())
    }

    fn release_child(&mut self, child: NodeKey) -> TreeResult<()> {
        let node = self.slot_mut(child)?;
        node.parent = None;
        if node.state == NodeState::Attached {
            let order = self.subtree_pre_order(child)?;
            for key in order.into_iter().rev() {
                self.unregister(key)?;
            }
        }
        Ok(())
    }

    /// Set the server-only flag of `root` and derive it for everything below
    fn flag_server_only(&mut self, root: NodeKey, server_only: bool) -> TreeResult<()> {
        let mut stack = vec![(root, server_only)];
        while let Some((key, flag)) = stack.pop() {
            if self.slot(key)?.server_only != flag {
                self.slot_mut(key)?.server_only = flag;
            }
            let node = self.slot(key)?;
            for (ns, namespace) in node.namespaces.iter() {
                match namespace {
                    Namespace::Map(map) => {
                        for (name, value) in map.iter() {
                            if let NodeValue::Node(child) = value {
                                stack.push((*child, flag || self.is_server_only_key(ns, name)));
                            }
                        }
                    }
                    Namespace::List(list) => {
                        stack.extend(list.items().iter().filter_map(NodeValue::as_node).map(|c| (c, flag)));
                    }
                }
            }
        }
        Ok(())
    }

    fn unregister(&mut self, key: NodeKey) -> TreeResult<()> {
        let node = self.slot_mut(key)?;
        if node.state != NodeState::Attached {
            return Ok(());
        }
        node.state = NodeState::Unregistered;
        let listeners = std::mem::take(&mut node.listeners);

        if let Some(id) = node.id {
            self.registry.remove(&id);
            match self.journal.as_mut() {
                Some(journal) => journal.listeners.push((key, id, listeners)),
                None => listeners.into_iter().for_each(|listener| listener(id)),
            }
            self.unregistered.push((key, id));
            log::trace!("Unregistered {} ({})", id, key);
        }
        self.mark_dirty(key);
        Ok(())
    }

    fn subtree_pre_order(&self, root: NodeKey) -> TreeResult<Vec<NodeKey>> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(key) = stack.pop() {
            let node = self.slot(key)?;
            order.push(key);
            stack.extend(node.children().into_iter().rev());
        }
        Ok(order)
    }

    fn mark_dirty(&mut self, key: NodeKey) {
        if self.dirty_set.insert(key) {
            self.dirty.push(key);
        }
    }
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new(TreeConfig::default())
    }
}

impl InvalidationSource<TreeSource> for StateTree {
    fn drain_invalidations(&mut self) -> Vec<TreeSource> {
        self.take_invalidations()
    }
}

fn out_of_range(ns: NamespaceId, e: OutOfRange) -> TreeError {
    TreeError::IndexOutOfBounds {
        ns,
        index: e.index,
        count: e.remove_count,
        len: e.len,
    }
}
