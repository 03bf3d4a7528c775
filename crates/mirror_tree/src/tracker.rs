//! Per-node change tracking
//!
//! Every tracked node buffers what changed since the last collect, coalesced
//! so the collected list is minimal:
//!
//! - **Maps** remember the value each key had when first touched. At collect
//!   time a key yields a put if its value differs from that original, a remove
//!   if it no longer has a value, and nothing if it ended where it started.
//! - **Lists** keep an operation log. An insert next to or inside the last
//!   pending insert is merged into it. Removing or replacing an item that a
//!   pending insert or replace introduced edits that pending record in place,
//!   and later records are re-indexed so the log never mentions an item that
//!   is gone by collect time. A clear discards everything before it.

use crate::namespace::{Namespace, NamespaceTable};
use crate::node::{NodeKey, NodeValue};
use mirror_core::{NamespaceId, NodeRole};

/// One pending change of a node, before node keys are resolved to ids
#[derive(Debug, Clone, PartialEq)]
pub enum NodeChange {
    Attach { role: NodeRole },
    Detach,
    Put { ns: NamespaceId, key: String, value: NodeValue },
    Remove { ns: NamespaceId, key: String },
    ListInsert { ns: NamespaceId, index: usize, items: Vec<NodeValue> },
    ListRemove { ns: NamespaceId, index: usize, count: usize },
    ListReplace { ns: NamespaceId, index: usize, value: NodeValue },
    ListClear { ns: NamespaceId },
}

impl NodeChange {
    /// Nodes referenced by the change's value(s)
    pub fn referenced_nodes(&self) -> Vec<NodeKey> {
        match self {
            Self::Put { value, .. } | Self::ListReplace { value, .. } => {
                value.as_node().into_iter().collect()
            }
            Self::ListInsert { items, .. } => items.iter().filter_map(NodeValue::as_node).collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ListOp {
    Insert { index: usize, items: Vec<NodeValue> },
    Remove { index: usize, count: usize },
    Replace { index: usize, value: NodeValue },
    Clear,
}

#[derive(Debug, Clone, Default)]
struct ListLog {
    ops: Vec<ListOp>,
}

impl ListLog {
    fn insert(&mut self, index: usize, items: Vec<NodeValue>) {
        if items.is_empty() {
            return;
        }
        if let Some(ListOp::Insert { index: start, items: pending }) = self.ops.last_mut() {
            if index >= *start && index <= *start + pending.len() {
                let at = index - *start;
                pending.splice(at..at, items);
                return;
            }
        }
        self.ops.push(ListOp::Insert { index, items });
    }

    fn remove(&mut self, index: usize) {
        let Some((op, offset)) = self.trace(index) else {
            if let Some(ListOp::Remove { index: start, count }) = self.ops.last_mut() {
                if *start == index {
                    *count += 1;
                    return;
                }
            }
            self.ops.push(ListOp::Remove { index, count: 1 });
            return;
        };

        let (position, emptied, replaced) = match &mut self.ops[op] {
            ListOp::Insert { index: start, items } => {
                items.remove(offset);
                (*start + offset, items.is_empty(), false)
            }
            ListOp::Replace { index: at, .. } => (*at, false, true),
            ListOp::Remove { .. } | ListOp::Clear => return,
        };

        // The item never existed from `op` on; an introduced-by-replace item
        // turns the replace into a removal of the original it displaced.
        let next = if emptied {
            self.ops.remove(op);
            op
        } else {
            if replaced {
                self.ops[op] = ListOp::Remove {
                    index: position,
                    count: 1,
                };
            }
            op + 1
        };
        self.close_gap(next, position);
    }

    fn replace(&mut self, index: usize, value: NodeValue) {
        if let Some((op, offset)) = self.trace(index) {
            match &mut self.ops[op] {
                ListOp::Insert { items, .. } => {
                    items[offset] = value;
                    return;
                }
                ListOp::Replace { value: pending, .. } => {
                    *pending = value;
                    return;
                }
                ListOp::Remove { .. } | ListOp::Clear => {}
            }
        }
        self.ops.push(ListOp::Replace { index, value });
    }

    fn clear(&mut self) {
        self.ops.clear();
        self.ops.push(ListOp::Clear);
    }

    /// Find the pending op that introduced the item now at `position`
    fn trace(&self, position: usize) -> Option<(usize, usize)> {
        let mut pos = position;
        for (i, op) in self.ops.iter().enumerate().rev() {
            match op {
                ListOp::Insert { index, items } => {
                    let end = index + items.len();
                    if pos >= *index && pos < end {
                        return Some((i, pos - index));
                    }
                    if pos >= end {
                        pos -= items.len();
                    }
                }
                ListOp::Remove { index, count } => {
                    if pos >= *index {
                        pos += count;
                    }
                }
                ListOp::Replace { index, .. } => {
                    if pos == *index {
                        return Some((i, 0));
                    }
                }
                ListOp::Clear => return None,
            }
        }
        None
    }

    /// Re-index ops from `from` on as if the item at `position` had vanished
    fn close_gap(&mut self, from: usize, position: usize) {
        let mut q = position;
        for op in &mut self.ops[from..] {
            match op {
                ListOp::Insert { index, items } => {
                    if *index <= q {
                        q += items.len();
                    } else {
                        *index -= 1;
                    }
                }
                ListOp::Remove { index, count } => {
                    if *index + *count <= q {
                        q -= *count;
                    } else {
                        *index -= 1;
                    }
                }
                ListOp::Replace { index, .. } => {
                    if *index > q {
                        *index -= 1;
                    }
                }
                ListOp::Clear => break,
            }
        }
    }
}

#[derive(Debug, Clone)]
enum Pending {
    Map(Vec<(String, Option<NodeValue>)>),
    List(ListLog),
}

/// Pending changes of one node, per namespace in first-touch order
#[derive(Debug, Clone, Default)]
pub(crate) struct ChangeTracker {
    namespaces: Vec<(NamespaceId, Pending)>,
}

impl ChangeTracker {
    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    pub fn clear(&mut self) {
        self.namespaces.clear();
    }

    fn entry(&mut self, ns: NamespaceId) -> &mut Pending {
        let pos = match self.namespaces.iter().position(|(id, _)| *id == ns) {
            Some(pos) => pos,
            None => {
                let pending = if ns.is_list() {
                    Pending::List(ListLog::default())
                } else {
                    Pending::Map(Vec::new())
                };
                self.namespaces.push((ns, pending));
                self.namespaces.len() - 1
            }
        };
        &mut self.namespaces[pos].1
    }

    /// Note that `key` is about to change; `original` is its current value
    pub fn touch_key(&mut self, ns: NamespaceId, key: &str, original: Option<&NodeValue>) {
        if let Pending::Map(entries) = self.entry(ns) {
            if !entries.iter().any(|(k, _)| k == key) {
                entries.push((key.to_string(), original.cloned()));
            }
        }
    }

    /// Make `baseline` the value `key` is compared against at collect time
    pub fn rebase_key(&mut self, ns: NamespaceId, key: &str, baseline: NodeValue) {
        if let Pending::Map(entries) = self.entry(ns) {
            match entries.iter_mut().find(|(k, _)| k == key) {
                Some((_, original)) => *original = Some(baseline),
                None => entries.push((key.to_string(), Some(baseline))),
            }
        }
    }

    pub fn insert(&mut self, ns: NamespaceId, index: usize, items: Vec<NodeValue>) {
        if let Pending::List(log) = self.entry(ns) {
            log.insert(index, items);
        }
    }

    /// Removal of the single item at `index`
    pub fn remove(&mut self, ns: NamespaceId, index: usize) {
        if let Pending::List(log) = self.entry(ns) {
            log.remove(index);
        }
    }

    pub fn replace(&mut self, ns: NamespaceId, index: usize, value: NodeValue) {
        if let Pending::List(log) = self.entry(ns) {
            log.replace(index, value);
        }
    }

    pub fn clear_list(&mut self, ns: NamespaceId) {
        if let Pending::List(log) = self.entry(ns) {
            log.clear();
        }
    }

    /// Drain the coalesced changes, reading final map values from `table`
    pub fn collect(&mut self, table: &NamespaceTable<NodeValue>) -> Vec<NodeChange> {
        let mut changes = Vec::new();

        for (ns, pending) in self.namespaces.drain(..) {
            match pending {
                Pending::Map(entries) => {
                    let current = table.map(ns);
                    for (key, original) in entries {
                        let now = current.and_then(|m| m.get(&key));
                        if now == original.as_ref() {
                            continue;
                        }
                        changes.push(match now {
                            Some(value) => NodeChange::Put {
                                ns,
                                key,
                                value: value.clone(),
                            },
                            None => NodeChange::Remove { ns, key },
                        });
                    }
                }
                Pending::List(log) => {
                    changes.extend(log.ops.into_iter().map(|op| match op {
                        ListOp::Insert { index, items } => NodeChange::ListInsert { ns, index, items },
                        ListOp::Remove { index, count } => NodeChange::ListRemove { ns, index, count },
                        ListOp::Replace { index, value } => NodeChange::ListReplace { ns, index, value },
                        ListOp::Clear => NodeChange::ListClear { ns },
                    }));
                }
            }
        }

        changes
    }
}

/// Changes that rebuild `table` from nothing: map keys in insertion order and
/// one insert per non-empty list
pub(crate) fn full_state(table: &NamespaceTable<NodeValue>) -> Vec<NodeChange> {
    let mut changes = Vec::new();
    for (ns, namespace) in table.iter() {
        match namespace {
            Namespace::Map(map) => {
                changes.extend(map.iter().map(|(key, value)| NodeChange::Put {
                    ns,
                    key: key.to_string(),
                    value: value.clone(),
                }));
            }
            Namespace::List(list) if !list.is_empty() => {
                changes.push(NodeChange::ListInsert {
                    ns,
                    index: 0,
                    items: list.items().to_vec(),
                });
            }
            Namespace::List(_) => {}
        }
    }
    changes
}
