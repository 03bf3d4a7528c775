//! Per-client metadata suppression

use crate::transaction::TransactionLog;
use mirror_core::TemplateId;
use std::collections::HashSet;

/// Drops template definitions a client has already received
#[derive(Debug, Default)]
pub struct MetadataOptimizer {
    sent: HashSet<TemplateId>,
}

impl MetadataOptimizer {
    /// Create an optimizer for a fresh client
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove known definitions from `log` and remember the rest as sent.
    /// Returns how many definitions were dropped.
    pub fn optimize(&mut self, log: &mut TransactionLog) -> usize {
        let before = log.new_metadata.len();
        log.new_metadata.retain(|id, _| !self.sent.contains(id));
        self.sent.extend(log.new_metadata.keys().copied());
        before - log.new_metadata.len()
    }

    /// Whether `id` has been sent
    pub fn was_sent(&self, id: TemplateId) -> bool {
        self.sent.contains(&id)
    }

    /// Forget everything sent, e.g. before a full resync
    pub fn reset(&mut self) {
        self.sent.clear();
    }
}
