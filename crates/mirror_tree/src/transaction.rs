//! Transaction log construction
//!
//! The builder drains the tree's dirty nodes and turns their pending changes
//! into one ordered batch that the client can apply front to back.
//!
//! ## Ordering
//!
//! Nodes are visited in first-touch order. Before a record that references a
//! node is emitted, that node's own pending records (its attach and full
//! state, for a new node) are emitted first, depth-first. A reference that
//! can still not be resolved afterwards aborts the batch.
//!
//! Detach records go last, deepest node first. A parent's list record that
//! removes a child is applied before the child is released, whatever order
//! the nodes were touched in.

use crate::error::{BuildError, TreeError};
use crate::node::{NodeKey, NodeValue};
use crate::tracker::NodeChange;
use crate::tree::StateTree;
use mirror_core::{ChangeKind, ChangeRecord, ChangeValue, NodeId, TemplateDefinition, TemplateId};
use std::collections::{BTreeMap, HashSet};

/// Statistics for one built batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStats {
    /// Dirty nodes drained from the tree
    pub dirty_nodes: usize,
    /// Nodes that contributed at least one record
    pub emitting_nodes: usize,
    /// Records emitted
    pub records: usize,
    /// Attach records
    pub attaches: usize,
    /// Detach records
    pub detaches: usize,
    /// Nodes visited early to satisfy a forward reference
    pub forward_visits: usize,
    /// Changes kept on the server
    pub withheld: usize,
    /// Unregistered nodes dropped from the arena afterwards
    pub purged: usize,
}

/// One outgoing batch
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionLog {
    /// Records in application order
    pub changes: Vec<ChangeRecord>,
    /// Template definitions referenced by `changes`
    pub new_metadata: BTreeMap<TemplateId, TemplateDefinition>,
    /// Build statistics
    pub stats: LogStats,
}

impl TransactionLog {
    /// Whether the batch carries nothing
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.new_metadata.is_empty()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

/// Builds a [`TransactionLog`] from a tree's pending changes
pub struct TransactionLogBuilder<'a> {
    tree: &'a mut StateTree,
    pending: HashSet<NodeKey>,
    visited: HashSet<NodeKey>,
    detaches: Vec<ChangeRecord>,
    log: TransactionLog,
}

impl<'a> TransactionLogBuilder<'a> {
    /// Create a builder over `tree`
    pub fn new(tree: &'a mut StateTree) -> Self {
        Self {
            tree,
            pending: HashSet::new(),
            visited: HashSet::new(),
            detaches: Vec::new(),
            log: TransactionLog::default(),
        }
    }

    /// Drain the tree and build the batch
    pub fn build(mut self) -> Result<TransactionLog, BuildError> {
        let dirty = self.tree.take_dirty();
        self.pending = dirty.iter().copied().collect();
        self.log.stats.dirty_nodes = dirty.len();

        for key in dirty {
            self.visit(key)?;
        }

        // Ids grow downwards from the root, so descending ids release
        // descendants before their ancestors
        self.detaches.sort_by(|a, b| b.node.cmp(&a.node));
        self.log.changes.append(&mut self.detaches);

        self.log.stats.purged = self.tree.purge_unregistered();
        self.log.stats.records = self.log.changes.len();
        log::debug!(
            "Built transaction log: {} records from {} dirty nodes ({} attach, {} detach, {} templates)",
            self.log.stats.records,
            self.log.stats.dirty_nodes,
            self.log.stats.attaches,
            self.log.stats.detaches,
            self.log.new_metadata.len()
        );
        Ok(self.log)
    }

    fn visit(&mut self, key: NodeKey) -> Result<(), BuildError> {
        if !self.visited.insert(key) {
            return Ok(());
        }
        let changes = self.tree.collect_changes(key)?;
        if self.tree.is_server_only(key) {
            self.log.stats.withheld += changes.len();
            return Ok(());
        }
        let (withheld, changes): (Vec<_>, Vec<_>) =
            changes.into_iter().partition(|c| self.is_withheld(c));
        self.log.stats.withheld += withheld.len();
        if changes.is_empty() {
            return Ok(());
        }
        let id = self
            .tree
            .wire_id(key)
            .ok_or(TreeError::NotRegistered(key))?;
        self.log.stats.emitting_nodes += 1;

        for change in changes {
            for target in change.referenced_nodes() {
                if self.pending.contains(&target) && !self.visited.contains(&target) {
                    self.log.stats.forward_visits += 1;
                    self.visit(target)?;
                }
            }
            let record = self.convert(id, change)?;
            if record.is_detach() {
                self.log.stats.detaches += 1;
                self.detaches.push(record);
                continue;
            }
            if record.is_attach() {
                self.log.stats.attaches += 1;
            }
            self.log.changes.push(record);
        }
        Ok(())
    }

    fn is_withheld(&self, change: &NodeChange) -> bool {
        match change {
            NodeChange::Put { ns, key, .. } | NodeChange::Remove { ns, key } => {
                self.tree.is_server_only_key(*ns, key)
            }
            _ => false,
        }
    }

    fn convert(&mut self, id: NodeId, change: NodeChange) -> Result<ChangeRecord, BuildError> {
        let kind = match change {
            NodeChange::Attach { role } => ChangeKind::Attach { role },
            NodeChange::Detach => ChangeKind::Detach,
            NodeChange::Put { ns, key, value } => ChangeKind::Put {
                ns,
                key,
                value: self.resolve(id, &value)?,
            },
            NodeChange::Remove { ns, key } => ChangeKind::Remove { ns, key },
            NodeChange::ListInsert { ns, index, items } => ChangeKind::ListInsert {
                ns,
                index,
                items: items
                    .iter()
                    .map(|item| self.resolve(id, item))
                    .collect::<Result<_, _>>()?,
            },
            NodeChange::ListRemove { ns, index, count } => ChangeKind::ListRemove { ns, index, count },
            NodeChange::ListReplace { ns, index, value } => ChangeKind::ListReplace {
                ns,
                index,
                value: self.resolve(id, &value)?,
            },
            NodeChange::ListClear { ns } => ChangeKind::ListClear { ns },
        };
        Ok(ChangeRecord::new(id, kind))
    }

    fn resolve(&mut self, from: NodeId, value: &NodeValue) -> Result<ChangeValue, BuildError> {
        match value {
            NodeValue::Node(target) => {
                if !self.visited.contains(target) && self.pending.contains(target) {
                    return Err(BuildError::UnresolvedReference { from, target: *target });
                }
                self.tree
                    .node_id(*target)
                    .map(ChangeValue::Node)
                    .ok_or(BuildError::UnresolvedReference { from, target: *target })
            }
            NodeValue::Template(template) => {
                if !self.log.new_metadata.contains_key(template) {
                    let definition = self
                        .tree
                        .template(*template)
                        .cloned()
                        .ok_or(BuildError::UnknownTemplate(*template))?;
                    self.log.new_metadata.insert(*template, definition);
                }
                Ok(ChangeValue::Template(*template))
            }
            NodeValue::Literal(v) => Ok(ChangeValue::Literal(v.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::{ChangeValue, NamespaceId, NamespaceSnapshot, NodeRole, TEMPLATE_KEY};

    const CHILDREN: NamespaceId = NamespaceId::ElementChildren;
    const PROPS: NamespaceId = NamespaceId::ElementProperties;

    fn build(tree: &mut StateTree) -> TransactionLog {
        TransactionLogBuilder::new(tree).build().unwrap()
    }

    #[test]
    fn test_initial_batch_attaches_root() {
        let mut tree = StateTree::default();
        let log = build(&mut tree);
        assert_eq!(log.changes[0], ChangeRecord::new(NodeId::ROOT, ChangeKind::Attach { role: NodeRole::Element }));
        assert_eq!(log.stats.attaches, 1);
        assert!(build(&mut tree).is_empty());
    }

    #[test]
    fn test_child_attach_precedes_reference() {
        let mut tree = StateTree::default();
        build(&mut tree);

        let root = tree.root();
        let list = tree.create_element("ul");
        let item = tree.create_element("li");
        tree.push(root, CHILDREN, list).unwrap();
        tree.push(list, CHILDREN, item).unwrap();

        let log = build(&mut tree);
        let position = |wanted: &dyn Fn(&ChangeRecord) -> bool| {
            log.changes.iter().position(|r| wanted(r)).unwrap()
        };
        let list_id = tree.node_id(list).unwrap();
        let item_id = tree.node_id(item).unwrap();

        let list_attach = position(&|r| r.node == list_id && r.is_attach());
        let item_attach = position(&|r| r.node == item_id && r.is_attach());
        let root_insert = position(&|r| r.node == NodeId::ROOT && r.referenced_nodes() == vec![list_id]);
        let list_insert = position(&|r| r.node == list_id && r.referenced_nodes() == vec![item_id]);

        assert!(list_attach < root_insert);
        assert!(item_attach < list_insert);
        assert_eq!(log.stats.attaches, 2);
    }

    #[test]
    fn test_detach_is_emitted_once_and_node_purged() {
        let mut tree = StateTree::default();
        let root = tree.root();
        let child = tree.create_text("bye");
        tree.push(root, CHILDREN, child).unwrap();
        build(&mut tree);
        let id = tree.node_id(child).unwrap();

        tree.remove_at(root, CHILDREN, 0).unwrap();
        let log = build(&mut tree);
        assert_eq!(
            log.changes,
            vec![
                ChangeRecord::new(NodeId::ROOT, ChangeKind::ListRemove { ns: CHILDREN, index: 0, count: 1 }),
                ChangeRecord::new(id, ChangeKind::Detach),
            ]
        );
        assert_eq!(log.stats.purged, 1);
        assert!(!tree.contains(child));
    }

    #[test]
    fn test_detach_follows_parent_removal_of_touched_child() {
        let mut tree = StateTree::default();
        let root = tree.root();
        let outer = tree.create_element("div");
        let inner = tree.create_element("span");
        tree.push(root, CHILDREN, outer).unwrap();
        tree.push(outer, CHILDREN, inner).unwrap();
        build(&mut tree);
        let outer_id = tree.node_id(outer).unwrap();
        let inner_id = tree.node_id(inner).unwrap();

        // Touch the subtree before its parent drops it
        let late = tree.create_element("b");
        tree.push(inner, CHILDREN, late).unwrap();
        tree.put(outer, PROPS, "title", "x").unwrap();
        tree.clear_list(root, CHILDREN).unwrap();

        let log = build(&mut tree);
        assert_eq!(
            log.changes,
            vec![
                ChangeRecord::new(NodeId::ROOT, ChangeKind::ListClear { ns: CHILDREN }),
                ChangeRecord::new(inner_id, ChangeKind::Detach),
                ChangeRecord::new(outer_id, ChangeKind::Detach),
            ]
        );
        assert_eq!(log.stats.detaches, 2);
    }

    #[test]
    fn test_server_only_values_stay_behind() {
        let mut tree = StateTree::default();
        let root = tree.root();
        tree.mark_server_only_key(PROPS, "model").unwrap();
        build(&mut tree);

        let holder = tree.create_element("div");
        let leaf = tree.create_text("hidden");
        tree.push(holder, CHILDREN, leaf).unwrap();
        tree.put(root, PROPS, "model", holder).unwrap();
        tree.put(root, PROPS, "label", "shown").unwrap();

        let log = build(&mut tree);
        assert_eq!(
            log.changes,
            vec![ChangeRecord::new(
                NodeId::ROOT,
                ChangeKind::Put {
                    ns: PROPS,
                    key: "label".into(),
                    value: ChangeValue::Literal("shown".into()),
                },
            )]
        );
        assert!(log.stats.withheld > 0);
        assert!(tree.node_id(leaf).is_some());
        assert!(tree.is_server_only(leaf));

        let snapshot = tree.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(
            snapshot.nodes[&NodeId::ROOT].namespaces.get(&PROPS),
            Some(&NamespaceSnapshot::Map(
                [("label".to_string(), ChangeValue::Literal("shown".into()))].into_iter().collect()
            ))
        );

        tree.remove(root, PROPS, "model").unwrap();
        assert!(build(&mut tree).is_empty());
        assert!(!tree.contains(leaf));
    }

    #[test]
    fn test_templates_sent_with_first_reference() {
        let mut tree = StateTree::default();
        let root = tree.root();
        let template = tree.register_template(TemplateDefinition::new("span").with_binding("textContent", "label"));
        let a = tree.create_template_node(template).unwrap();
        let b = tree.create_template_node(template).unwrap();
        tree.push(root, CHILDREN, a).unwrap();
        tree.push(root, CHILDREN, b).unwrap();

        let log = build(&mut tree);
        assert_eq!(log.new_metadata.len(), 1);
        let template_puts = log
            .changes
            .iter()
            .filter(|r| matches!(&r.kind, ChangeKind::Put { key, .. } if key == TEMPLATE_KEY))
            .count();
        assert_eq!(template_puts, 2);
    }

    #[test]
    fn test_property_holding_node() {
        let mut tree = StateTree::default();
        build(&mut tree);
        let root = tree.root();
        let label = tree.create_text("label");
        tree.put(root, PROPS, "label", label).unwrap();

        let log = build(&mut tree);
        let label_id = tree.node_id(label).unwrap();
        assert!(log.changes[0].is_attach());
        assert_eq!(log.changes[0].node, label_id);
        assert_eq!(
            log.changes.last().unwrap().kind,
            ChangeKind::Put {
                ns: PROPS,
                key: "label".into(),
                value: ChangeValue::Node(label_id),
            }
        );
    }
}
