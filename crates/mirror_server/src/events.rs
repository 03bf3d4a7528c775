//! Event and navigation routing
//!
//! Handlers are keyed by (node, event type). They receive the tree directly,
//! so anything they change is part of the turn's batch. A handler runs as one
//! atomic tree update: when it fails, its partial changes are rolled back.

use mirror_core::{NodeId, Value};
use mirror_tree::{NodeKey, StateTree, TreeResult};
use std::collections::HashMap;

/// A DOM event delivered by the client
#[derive(Debug, Clone, PartialEq)]
pub struct UiEvent {
    pub node: NodeKey,
    pub node_id: NodeId,
    pub event_type: String,
    pub data: Value,
}

/// A client-side navigation
#[derive(Debug, Clone, PartialEq)]
pub struct Navigation {
    pub location: String,
    pub state: Value,
}

/// Server-side event handler
pub type EventHandler = Box<dyn FnMut(&mut StateTree, &UiEvent) -> TreeResult<()> + Send>;

/// Server-side navigation handler
pub type NavigationHandler = Box<dyn FnMut(&mut StateTree, &Navigation) -> TreeResult<()> + Send>;

/// How a dispatch went
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub handled: usize,
    pub failed: usize,
}

/// Routes events to the handlers registered for their node
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<NodeKey, Vec<(String, EventHandler)>>,
    navigation: Option<NavigationHandler>,
}

impl EventRouter {
    /// Create an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `event_type` on `node`
    pub fn add<F>(&mut self, node: NodeKey, event_type: impl Into<String>, handler: F)
    where
        F: FnMut(&mut StateTree, &UiEvent) -> TreeResult<()> + Send + 'static,
    {
        let handler: EventHandler = Box::new(handler);
        self.handlers
            .entry(node)
            .or_default()
            .push((event_type.into(), handler));
    }

    /// Drop every handler of `node`, returning how many there were
    pub fn remove_node(&mut self, node: NodeKey) -> usize {
        self.handlers.remove(&node).map_or(0, |h| h.len())
    }

    /// Number of handlers registered for `node`
    pub fn handler_count(&self, node: NodeKey) -> usize {
        self.handlers.get(&node).map_or(0, Vec::len)
    }

    /// Install the navigation handler, replacing any previous one
    pub fn set_navigation<F>(&mut self, handler: F)
    where
        F: FnMut(&mut StateTree, &Navigation) -> TreeResult<()> + Send + 'static,
    {
        self.navigation = Some(Box::new(handler));
    }

    /// Run the handlers for `event`. A failing handler does not stop the others.
    pub fn dispatch(&mut self, tree: &mut StateTree, event: &UiEvent) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let Some(handlers) = self.handlers.get_mut(&event.node) else {
            log::debug!("No handlers for '{}' on {}", event.event_type, event.node_id);
            return outcome;
        };

        for (event_type, handler) in handlers.iter_mut() {
            if *event_type != event.event_type {
                continue;
            }
            match tree.atomically(|tree| handler(tree, event)) {
                Ok(()) => outcome.handled += 1,
                Err(e) => {
                    log::warn!(
                        "Handler for '{}' on {} failed: {}",
                        event.event_type,
                        event.node_id,
                        e
                    );
                    outcome.failed += 1;
                }
            }
        }
        outcome
    }

    /// Run the navigation handler, if any
    pub fn navigate(&mut self, tree: &mut StateTree, navigation: &Navigation) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let Some(handler) = self.navigation.as_mut() else {
            log::debug!("Ignoring navigation to '{}'; no handler installed", navigation.location);
            return outcome;
        };
        match tree.atomically(|tree| handler(tree, navigation)) {
            Ok(()) => outcome.handled += 1,
            Err(e) => {
                log::warn!("Navigation to '{}' failed: {}", navigation.location, e);
                outcome.failed += 1;
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_core::NamespaceId;

    fn click(tree: &StateTree, node: NodeKey) -> UiEvent {
        UiEvent {
            node,
            node_id: tree.node_id(node).unwrap_or(NodeId::ROOT),
            event_type: "click".into(),
            data: Value::Null,
        }
    }

    #[test]
    fn test_dispatch_matches_event_type() {
        let mut tree = StateTree::default();
        let root = tree.root();
        let mut router = EventRouter::new();
        router.add(root, "click", |tree: &mut StateTree, event: &UiEvent| {
            tree.put(event.node, NamespaceId::ElementProperties, "clicked", true)?;
            Ok(())
        });
        router.add(root, "input", |_: &mut StateTree, _: &UiEvent| Ok(()));

        let event = click(&tree, root);
        let outcome = router.dispatch(&mut tree, &event);
        assert_eq!(outcome, DispatchOutcome { handled: 1, failed: 0 });
        assert!(tree.has(root, NamespaceId::ElementProperties, "clicked").unwrap());
    }

    #[test]
    fn test_failing_handler_is_isolated() {
        let mut tree = StateTree::default();
        let root = tree.root();
        let mut router = EventRouter::new();
        router.add(root, "click", |tree: &mut StateTree, event: &UiEvent| {
            tree.put(event.node, NamespaceId::ElementProperties, "half", "done")?;
            tree.put(event.node, NamespaceId::TextNode, "text", "x")?;
            Ok(())
        });
        router.add(root, "click", |_: &mut StateTree, _: &UiEvent| Ok(()));

        let event = click(&tree, root);
        let outcome = router.dispatch(&mut tree, &event);
        assert_eq!(outcome, DispatchOutcome { handled: 1, failed: 1 });
        assert!(!tree.has(root, NamespaceId::ElementProperties, "half").unwrap());
        assert_eq!(router.remove_node(root), 2);
        assert_eq!(router.dispatch(&mut tree, &event).handled, 0);
    }
}
