//! Batch replay
//!
//! ## Phases
//!
//! ```text
//! phase 1: register every attached node          (forward references resolve)
//! phase 2: apply records in order
//!            └─ before a record referencing node N, apply N's later
//!               records first (recursively, each node pulled once)
//! ```
//!
//! A detach first tells the observer, so bindings are torn down while the
//! node is still readable, and then unregisters it.

use crate::error::{ReplicaError, ReplicaResult};
use crate::tree::{ClientTree, SpliceEvent};
use mirror_core::{ChangeKind, ChangeRecord, NodeId};
use std::collections::{HashMap, HashSet};

/// Side effects of a batch that must happen while it is being applied
pub trait ApplyObserver {
    /// A list namespace changed
    fn spliced(&mut self, tree: &ClientTree, event: &SpliceEvent) -> ReplicaResult<()>;

    /// `id` is about to be unregistered
    fn detaching(&mut self, tree: &ClientTree, id: NodeId);
}

/// Observer that ignores everything
pub struct Unobserved;

impl ApplyObserver for Unobserved {
    fn spliced(&mut self, _: &ClientTree, _: &SpliceEvent) -> ReplicaResult<()> {
        Ok(())
    }

    fn detaching(&mut self, _: &ClientTree, _: NodeId) {}
}

/// Statistics for one applied batch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub records: usize,
    pub attached: usize,
    pub detached: usize,
    pub splices: usize,
    /// Records applied ahead of their position to satisfy a reference
    pub pulled_forward: usize,
}

/// Applies one batch to a [`ClientTree`]
pub struct Replicator<'a, O: ApplyObserver + ?Sized> {
    tree: &'a mut ClientTree,
    observer: &'a mut O,
    records: &'a [ChangeRecord],
    applied: Vec<bool>,
    by_node: HashMap<NodeId, Vec<usize>>,
    pulling: HashSet<NodeId>,
    stats: ApplyStats,
}

impl<'a, O: ApplyObserver + ?Sized> Replicator<'a, O> {
    /// Prepare to apply `records`
    pub fn new(tree: &'a mut ClientTree, observer: &'a mut O, records: &'a [ChangeRecord]) -> Self {
        let mut by_node: HashMap<NodeId, Vec<usize>> = HashMap::new();
        for (i, record) in records.iter().enumerate() {
            if !record.is_attach() && !record.is_detach() {
                by_node.entry(record.node).or_default().push(i);
            }
        }
        Self {
            tree,
            observer,
            records,
            applied: vec![false; records.len()],
            by_node,
            pulling: HashSet::new(),
            stats: ApplyStats::default(),
        }
    }

    /// Apply the batch. An error leaves the tree partially updated.
    pub fn apply(mut self) -> ReplicaResult<ApplyStats> {
        self.stats.records = self.records.len();

        for record in self.records {
            if let ChangeKind::Attach { role } = record.kind {
                self.tree.register(record.node, role)?;
                self.stats.attached += 1;
            }
        }

        for i in 0..self.records.len() {
            self.apply_at(i)?;
        }

        log::debug!(
            "Applied {} records ({} attach, {} detach, {} pulled forward)",
            self.stats.records,
            self.stats.attached,
            self.stats.detached,
            self.stats.pulled_forward
        );
        Ok(self.stats)
    }

    fn apply_at(&mut self, i: usize) -> ReplicaResult<()> {
        if self.applied[i] {
            return Ok(());
        }
        self.applied[i] = true;
        let records = self.records;
        let record = &records[i];

        match &record.kind {
            ChangeKind::Attach { .. } => return Ok(()),
            ChangeKind::Detach => {
                if !self.tree.contains(record.node) {
                    return Err(ReplicaError::UnknownNode {
                        node: record.node,
                        change: "detach",
                    });
                }
                self.observer.detaching(self.tree, record.node);
                self.tree.unregister(record.node)?;
                self.stats.detached += 1;
                return Ok(());
            }
            _ => {}
        }

        for target in record.referenced_nodes() {
            self.pull(target, i)?;
            if !self.tree.contains(target) {
                log::error!("{} references unknown {}", record, target);
                return Err(ReplicaError::UnresolvedReference {
                    from: record.node,
                    target,
                });
            }
        }
        self.mutate(record)
    }

    /// Apply the records of `target` that come after `position`
    fn pull(&mut self, target: NodeId, position: usize) -> ReplicaResult<()> {
        if !self.pulling.insert(target) {
            return Ok(());
        }
        let later: Vec<usize> = self
            .by_node
            .get(&target)
            .map(|indices| {
                indices
                    .iter()
                    .copied()
                    .filter(|j| *j > position && !self.applied[*j])
                    .collect()
            })
            .unwrap_or_default();
        self.stats.pulled_forward += later.len();
        for j in later {
            self.apply_at(j)?;
        }
        self.pulling.remove(&target);
        Ok(())
    }

    fn mutate(&mut self, record: &ChangeRecord) -> ReplicaResult<()> {
        let id = record.node;
        let event = match &record.kind {
            ChangeKind::Put { ns, key, value } => {
                self.tree.put(id, *ns, key, value.clone())?;
                None
            }
            ChangeKind::Remove { ns, key } => {
                self.tree.remove(id, *ns, key)?;
                None
            }
            ChangeKind::ListInsert { ns, index, items } => {
                let outcome = self.tree.splice(id, *ns, *index, 0, items.clone())?;
                Some(SpliceEvent {
                    node: id,
                    ns: *ns,
                    index: outcome.index,
                    removed: outcome.removed,
                    added: outcome.added,
                })
            }
            ChangeKind::ListRemove { ns, index, count } => {
                let outcome = self.tree.splice(id, *ns, *index, *count, Vec::new())?;
                Some(SpliceEvent {
                    node: id,
                    ns: *ns,
                    index: outcome.index,
                    removed: outcome.removed,
                    added: Vec::new(),
                })
            }
            ChangeKind::ListReplace { ns, index, value } => {
                let old = self.tree.replace(id, *ns, *index, value.clone())?;
                Some(SpliceEvent {
                    node: id,
                    ns: *ns,
                    index: *index,
                    removed: vec![old],
                    added: vec![value.clone()],
                })
            }
            ChangeKind::ListClear { ns } => {
                let removed = self.tree.clear_list(id, *ns)?;
                Some(SpliceEvent {
                    node: id,
                    ns: *ns,
                    index: 0,
                    removed,
                    added: Vec::new(),
                })
            }
            ChangeKind::Attach { .. } | ChangeKind::Detach => None,
        };

        if let Some(event) = event {
            self.stats.splices += 1;
            self.observer.spliced(self.tree, &event)?;
        }
        Ok(())
    }
}

/// Apply `records` to `tree`, reporting side effects to `observer`
pub fn apply_batch<O: ApplyObserver + ?Sized>(
    tree: &mut ClientTree,
    observer: &mut O,
    records: &[ChangeRecord],
) -> ReplicaResult<ApplyStats> {
    Replicator::new(tree, observer, records).apply()
}
