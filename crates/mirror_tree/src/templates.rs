//! Template definitions known to a tree

use mirror_core::{TemplateDefinition, TemplateId};
use std::collections::BTreeMap;

/// Registered template definitions, ids assigned in registration order
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    definitions: BTreeMap<TemplateId, TemplateDefinition>,
    next_id: u32,
}

impl TemplateRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Identical definitions share one id.
    pub fn register(&mut self, definition: TemplateDefinition) -> TemplateId {
        if let Some((id, _)) = self.definitions.iter().find(|(_, d)| **d == definition) {
            return *id;
        }
        self.next_id += 1;
        let id = TemplateId::new(self.next_id);
        self.definitions.insert(id, definition);
        id
    }

    /// Look up a definition
    pub fn get(&self, id: TemplateId) -> Option<&TemplateDefinition> {
        self.definitions.get(&id)
    }

    /// Whether `id` is registered
    pub fn contains(&self, id: TemplateId) -> bool {
        self.definitions.contains_key(&id)
    }

    /// Number of definitions
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether no definition is registered
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
