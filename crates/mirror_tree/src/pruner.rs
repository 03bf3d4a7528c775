//! Echo suppression for client property syncs
//!
//! When the client pushes a property value, the server applies it to the tree
//! like any other mutation. Sending the resulting put back would only echo
//! what the client already shows, so the session marks the key ignorable and
//! the pruner drops the put, provided the value still equals what the client
//! sent.

use crate::transaction::TransactionLog;
use mirror_core::{ChangeKind, ChangeValue, NamespaceId, NodeId, Value};
use std::collections::HashMap;

/// Removes records the client already knows about
#[derive(Debug, Default)]
pub struct ChangePruner {
    ignored: HashMap<(NodeId, NamespaceId, String), Value>,
}

impl ChangePruner {
    /// Create an empty pruner
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a put of `value` to `key` as known by the client
    pub fn ignore(&mut self, node: NodeId, ns: NamespaceId, key: impl Into<String>, value: Value) {
        self.ignored.insert((node, ns, key.into()), value);
    }

    /// Number of pending ignore entries
    pub fn len(&self) -> usize {
        self.ignored.len()
    }

    /// Whether there are no pending ignore entries
    pub fn is_empty(&self) -> bool {
        self.ignored.is_empty()
    }

    /// Drop ignorable puts from `log` and clear the ignore set.
    /// Returns how many records were dropped.
    pub fn prune(&mut self, log: &mut TransactionLog) -> usize {
        if self.ignored.is_empty() {
            return 0;
        }
        let ignored = std::mem::take(&mut self.ignored);
        let before = log.changes.len();
        log.changes.retain(|record| match &record.kind {
            ChangeKind::Put {
                ns,
                key,
                value: ChangeValue::Literal(value),
            } => ignored
                .get(&(record.node, *ns, key.clone()))
                .map_or(true, |sent| sent != value),
            _ => true,
        });
        before - log.changes.len()
    }

    /// Forget every ignore entry
    pub fn clear(&mut self) {
        self.ignored.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::ChangeRecord;

    const PROPS: NamespaceId = NamespaceId::ElementProperties;

    fn put(node: u32, key: &str, value: &str) -> ChangeRecord {
        ChangeRecord::new(
            NodeId::new(node),
            ChangeKind::Put {
                ns: PROPS,
                key: key.into(),
                value: ChangeValue::Literal(Value::from(value)),
            },
        )
    }

    #[test]
    fn test_echo_is_pruned_once() {
        let mut pruner = ChangePruner::new();
        pruner.ignore(NodeId::new(2), PROPS, "value", Value::from("hi"));

        let mut log = TransactionLog::default();
        log.changes = vec![put(2, "value", "hi"), put(3, "value", "hi")];
        assert_eq!(pruner.prune(&mut log), 1);
        assert_eq!(log.changes, vec![put(3, "value", "hi")]);
        assert!(pruner.is_empty());

        let mut again = TransactionLog::default();
        again.changes = vec![put(2, "value", "hi")];
        assert_eq!(pruner.prune(&mut again), 0);
    }

    #[test]
    fn test_changed_value_is_kept() {
        let mut pruner = ChangePruner::new();
        pruner.ignore(NodeId::new(2), PROPS, "value", Value::from("hi"));

        let mut log = TransactionLog::default();
        log.changes = vec![put(2, "value", "HI")];
        assert_eq!(pruner.prune(&mut log), 0);
        assert_eq!(log.changes.len(), 1);
    }
}
