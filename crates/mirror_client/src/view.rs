//! Rendered view of the replica
//!
//! Maps tree nodes to the document nodes rendering them and keeps the
//! template definitions received so far.

use crate::dom::{Dom, DomNodeId};
use crate::tree::{ClientSource, ClientTree};
use mirror_core::{NodeId, TemplateDefinition, TemplateId};
use mirror_reactive::InvalidationSource;
use std::collections::{BTreeMap, HashMap};

/// Document plus the node mapping
pub struct View<D> {
    dom: D,
    elements: HashMap<NodeId, DomNodeId>,
    owners: HashMap<DomNodeId, NodeId>,
    /// Static template content rendered for a node, released with it
    fragments: HashMap<NodeId, Vec<DomNodeId>>,
    templates: BTreeMap<TemplateId, TemplateDefinition>,
}

impl<D: Dom> View<D> {
    /// View over `dom`; nothing is rendered yet
    pub fn new(dom: D) -> Self {
        Self {
            dom,
            elements: HashMap::new(),
            owners: HashMap::new(),
            fragments: HashMap::new(),
            templates: BTreeMap::new(),
        }
    }

    pub fn dom(&self) -> &D {
        &self.dom
    }

    pub fn dom_mut(&mut self) -> &mut D {
        &mut self.dom
    }

    /// Document node rendering `id`
    pub fn element(&self, id: NodeId) -> Option<DomNodeId> {
        self.elements.get(&id).copied()
    }

    /// Tree node rendered by `dom_node`
    pub fn node_for(&self, dom_node: DomNodeId) -> Option<NodeId> {
        self.owners.get(&dom_node).copied()
    }

    /// Number of rendered tree nodes
    pub fn rendered_count(&self) -> usize {
        self.elements.len()
    }

    pub fn template(&self, id: TemplateId) -> Option<&TemplateDefinition> {
        self.templates.get(&id)
    }

    /// Remember template definitions sent by the server
    pub fn add_templates(&mut self, templates: impl IntoIterator<Item = (TemplateId, TemplateDefinition)>) {
        self.templates.extend(templates);
    }

    pub(crate) fn track(&mut self, id: NodeId, dom_node: DomNodeId) {
        self.elements.insert(id, dom_node);
        self.owners.insert(dom_node, id);
    }

    pub(crate) fn track_fragment(&mut self, id: NodeId, dom_nodes: Vec<DomNodeId>) {
        if !dom_nodes.is_empty() {
            self.fragments.insert(id, dom_nodes);
        }
    }

    /// Release the document nodes of `id`
    pub(crate) fn release(&mut self, id: NodeId) {
        for fragment in self.fragments.remove(&id).unwrap_or_default() {
            self.dom.release(fragment);
        }
        if let Some(dom_node) = self.elements.remove(&id) {
            self.owners.remove(&dom_node);
            if dom_node != self.dom.root() {
                self.dom.release(dom_node);
            }
        }
    }

    /// Release everything rendered, keeping the document root
    pub(crate) fn clear(&mut self) {
        let ids: Vec<NodeId> = self.elements.keys().copied().collect();
        for id in ids {
            self.release(id);
        }
        self.templates.clear();
    }
}

/// What binding computations run against
pub struct BindContext<D> {
    pub tree: ClientTree,
    pub view: View<D>,
}

impl<D: Dom> BindContext<D> {
    /// Empty tree over `dom`
    pub fn new(dom: D) -> Self {
        Self {
            tree: ClientTree::new(),
            view: View::new(dom),
        }
    }
}

impl<D> InvalidationSource<ClientSource> for BindContext<D> {
    fn drain_invalidations(&mut self) -> Vec<ClientSource> {
        self.tree.take_invalidations()
    }
}
