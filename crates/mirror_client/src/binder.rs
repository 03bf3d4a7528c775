//! Reactive bindings from the replica to the document
//!
//! ## Architecture
//!
//! ```text
//!   ClientTree ──invalidations──► BindingGraph ──flush──► Dom
//!       │                                                  ▲
//!       └──splice / detach (during apply)──► Attachment ───┘
//! ```
//!
//! Each rendered node gets one computation per property, attribute and
//! listener key, plus one for its text, one for its class list and one per
//! template binding. Child lists are not bound through computations: every
//! children splice is applied to the document as one splice.

use crate::dom::{Dom, DomNodeId};
use crate::error::{ReplicaError, ReplicaResult};
use crate::replicator::ApplyObserver;
use crate::tree::{AddedKey, ClientScope, ClientSource, ClientTree, SpliceEvent};
use crate::view::{BindContext, View};
use mirror_core::{
    ChangeValue, NamespaceId, NodeId, NodeRole, TemplateDefinition, Value, TAG_KEY, TEMPLATE_KEY,
    TEXT_KEY,
};
use mirror_reactive::{ComputationError, ComputationId, FlushReport, ReactiveConfig, ReactiveGraph};
use std::collections::HashMap;

/// Reactive graph of the binding computations
pub type BindingGraph<D> = ReactiveGraph<ClientSource, BindContext<D>>;

/// Binding computations of one rendered node
#[derive(Debug, Default)]
struct NodeBindings {
    keys: HashMap<(NamespaceId, String), ComputationId>,
    structural: Vec<ComputationId>,
}

impl NodeBindings {
    fn all(self) -> impl Iterator<Item = ComputationId> {
        self.keys.into_values().chain(self.structural)
    }
}

/// Owner of every binding computation
pub struct Binder<D> {
    graph: BindingGraph<D>,
    bindings: HashMap<NodeId, NodeBindings>,
}

impl<D: Dom + 'static> Binder<D> {
    pub fn new(config: ReactiveConfig) -> Self {
        Self {
            graph: ReactiveGraph::new(config),
            bindings: HashMap::new(),
        }
    }

    /// Number of live binding computations
    pub fn computation_count(&self) -> usize {
        self.graph.len()
    }

    /// Number of computations bound to `id`
    pub fn binding_count(&self, id: NodeId) -> usize {
        self.bindings
            .get(&id)
            .map_or(0, |b| b.keys.len() + b.structural.len())
    }

    /// Render the tree root into the document root once it exists
    pub fn bind_root(&mut self, tree: &ClientTree, view: &mut View<D>) -> ReplicaResult<()> {
        if !tree.contains(NodeId::ROOT) || view.element(NodeId::ROOT).is_some() {
            return Ok(());
        }
        let root = view.dom().root();
        view.track(NodeId::ROOT, root);
        self.bind_node(tree, view, NodeId::ROOT, NodeRole::Element, root)
    }

    /// Bind keys that gained a value on nodes that are already rendered
    pub fn bind_added_keys(&mut self, view: &View<D>, added: Vec<AddedKey>) {
        for AddedKey { node, ns, key } in added {
            if view.element(node).is_some() {
                self.bind_key(node, ns, &key);
            }
        }
    }

    /// Document node rendering `id`, creating and binding it on first use
    pub fn materialize(
        &mut self,
        tree: &ClientTree,
        view: &mut View<D>,
        id: NodeId,
    ) -> ReplicaResult<DomNodeId> {
        if let Some(existing) = view.element(id) {
            return Ok(existing);
        }
        let role = tree.role(id).ok_or(ReplicaError::UnknownNode {
            node: id,
            change: "render",
        })?;

        let dom_node = match role {
            NodeRole::Element => {
                let tag = tree
                    .literal(id, NamespaceId::ElementData, TAG_KEY)
                    .and_then(Value::as_str)
                    .unwrap_or("div");
                view.dom_mut().create_element(tag)
            }
            NodeRole::Text => {
                let text = tree
                    .literal(id, NamespaceId::TextNode, TEXT_KEY)
                    .map(Value::to_display_string)
                    .unwrap_or_default();
                view.dom_mut().create_text(&text)
            }
            NodeRole::TemplateBound => {
                let definition = template_of(tree, view, id)?;
                let mut fragment = Vec::new();
                let root = render_template(view.dom_mut(), &definition, &mut fragment)?;
                view.track_fragment(id, fragment);
                root
            }
        };
        view.track(id, dom_node);
        self.bind_node(tree, view, id, role, dom_node)?;
        Ok(dom_node)
    }

    /// Stop the computations of `id` and release its document nodes
    pub fn unbind(&mut self, view: &mut View<D>, id: NodeId) {
        if let Some(bindings) = self.bindings.remove(&id) {
            for computation in bindings.all() {
                if let Err(e) = self.graph.stop(computation) {
                    log::debug!("Binding of {} already stopped: {}", id, e);
                }
            }
        }
        view.release(id);
    }

    /// Stop everything, e.g. before a resync
    pub fn reset(&mut self, view: &mut View<D>) {
        let ids: Vec<NodeId> = self.bindings.keys().copied().collect();
        for id in ids {
            self.unbind(view, id);
        }
        view.clear();
    }

    /// Run every invalidated binding
    pub fn flush(&mut self, ctx: &mut BindContext<D>) -> ReplicaResult<FlushReport> {
        let report = self.graph.flush(ctx)?;
        if !report.is_clean() {
            log::warn!("{} bindings failed during flush", report.failures.len());
        }
        Ok(report)
    }

    fn bind_node(
        &mut self,
        tree: &ClientTree,
        view: &mut View<D>,
        id: NodeId,
        role: NodeRole,
        dom_node: DomNodeId,
    ) -> ReplicaResult<()> {
        match role {
            NodeRole::Element => {
                for ns in [
                    NamespaceId::ElementProperties,
                    NamespaceId::ElementAttributes,
                    NamespaceId::ElementListeners,
                ] {
                    for key in tree.keys(id, ns) {
                        self.bind_key(id, ns, &key);
                    }
                }
                let classes = self.graph.create(format!("{} class list", id), class_binding::<D>(id));
                self.bindings.entry(id).or_default().structural.push(classes);

                let mut children = Vec::new();
                for child in tree.list(id, NamespaceId::ElementChildren) {
                    if let Some(child) = child.node_id() {
                        children.push(self.materialize(tree, view, child)?);
                    }
                }
                if !children.is_empty() {
                    view.dom_mut().splice_children(dom_node, 0, 0, &children)?;
                }
            }
            NodeRole::Text => self.bind_key(id, NamespaceId::TextNode, TEXT_KEY),
            NodeRole::TemplateBound => {
                let definition = template_of(tree, view, id)?;
                for (property, model_key) in definition.bindings {
                    let computation = self.graph.create(
                        format!("{} template {}", id, property),
                        template_binding::<D>(id, property, model_key),
                    );
                    self.bindings.entry(id).or_default().structural.push(computation);
                }
            }
        }
        Ok(())
    }

    fn bind_key(&mut self, id: NodeId, ns: NamespaceId, key: &str) {
        let bindings = self.bindings.entry(id).or_default();
        if bindings.keys.contains_key(&(ns, key.to_string())) {
            return;
        }
        let name = format!("{} {}.{}", id, ns, key);
        let key = key.to_string();
        let computation = match ns {
            NamespaceId::ElementProperties => self.graph.create(name, property_binding::<D>(id, key.clone())),
            NamespaceId::ElementAttributes => self.graph.create(name, attribute_binding::<D>(id, key.clone())),
            NamespaceId::ElementListeners => self.graph.create(name, listener_binding::<D>(id, key.clone())),
            NamespaceId::TextNode if key == TEXT_KEY => self.graph.create(name, text_binding::<D>(id)),
            _ => return,
        };
        self.bindings
            .entry(id)
            .or_default()
            .keys
            .insert((ns, key), computation);
    }
}

/// Apply-time observer rendering child splices and tearing down detached nodes
pub struct Attachment<'a, D> {
    pub binder: &'a mut Binder<D>,
    pub view: &'a mut View<D>,
}

impl<'a, D: Dom + 'static> ApplyObserver for Attachment<'a, D> {
    fn spliced(&mut self, tree: &ClientTree, event: &SpliceEvent) -> ReplicaResult<()> {
        if event.ns != NamespaceId::ElementChildren {
            return Ok(());
        }
        // Unrendered parents pick up their children when they are rendered
        let Some(parent) = self.view.element(event.node) else {
            return Ok(());
        };
        let mut added = Vec::with_capacity(event.added.len());
        for child in event.added.iter().filter_map(ChangeValue::node_id) {
            added.push(self.binder.materialize(tree, self.view, child)?);
        }
        self.view
            .dom_mut()
            .splice_children(parent, event.index, event.removed.len(), &added)?;
        Ok(())
    }

    fn detaching(&mut self, _: &ClientTree, id: NodeId) {
        self.binder.unbind(self.view, id);
    }
}

fn template_of<D: Dom>(tree: &ClientTree, view: &View<D>, id: NodeId) -> ReplicaResult<TemplateDefinition> {
    match tree.get(id, NamespaceId::TemplateBinding, TEMPLATE_KEY) {
        Some(ChangeValue::Template(template)) => view
            .template(*template)
            .cloned()
            .ok_or(ReplicaError::UnknownTemplate(*template)),
        _ => Err(ReplicaError::MissingTemplate(id)),
    }
}

/// Render the static part of a template, collecting every node but the root
fn render_template<D: Dom>(
    dom: &mut D,
    definition: &TemplateDefinition,
    fragment: &mut Vec<DomNodeId>,
) -> ReplicaResult<DomNodeId> {
    let element = dom.create_element(&definition.tag);
    for (name, value) in &definition.attributes {
        dom.set_attribute(element, name, value)?;
    }
    let mut children = Vec::new();
    if let Some(text) = &definition.text {
        children.push(dom.create_text(text));
    }
    for child in &definition.children {
        children.push(render_template(dom, child, fragment)?);
    }
    fragment.extend(children.iter().copied());
    if !children.is_empty() {
        dom.splice_children(element, 0, 0, &children)?;
    }
    Ok(element)
}

type BindingBody<D> =
    Box<dyn FnMut(&mut BindContext<D>, &mut ClientScope) -> Result<(), ComputationError> + Send>;

fn property_binding<D: Dom + 'static>(node: NodeId, key: String) -> BindingBody<D> {
    Box::new(move |ctx: &mut BindContext<D>, scope: &mut ClientScope| {
        let Some(target) = ctx.view.element(node) else {
            return Ok(());
        };
        match ctx
            .tree
            .get_tracked(scope, node, NamespaceId::ElementProperties, &key)
        {
            Some(ChangeValue::Literal(value)) => ctx.view.dom_mut().set_property(target, &key, value)?,
            Some(_) => log::debug!("Property '{}' of {} holds a reference; not rendered", key, node),
            None => ctx.view.dom_mut().remove_property(target, &key)?,
        }
        Ok(())
    })
}

fn attribute_binding<D: Dom + 'static>(node: NodeId, key: String) -> BindingBody<D> {
    Box::new(move |ctx: &mut BindContext<D>, scope: &mut ClientScope| {
        let Some(target) = ctx.view.element(node) else {
            return Ok(());
        };
        match ctx
            .tree
            .get_tracked(scope, node, NamespaceId::ElementAttributes, &key)
            .and_then(ChangeValue::as_literal)
        {
            Some(value) if !value.is_null() => {
                let text = value.to_display_string();
                ctx.view.dom_mut().set_attribute(target, &key, &text)?
            }
            _ => ctx.view.dom_mut().remove_attribute(target, &key)?,
        }
        Ok(())
    })
}

fn listener_binding<D: Dom + 'static>(node: NodeId, event_type: String) -> BindingBody<D> {
    Box::new(move |ctx: &mut BindContext<D>, scope: &mut ClientScope| {
        let Some(target) = ctx.view.element(node) else {
            return Ok(());
        };
        let listening = ctx
            .tree
            .get_tracked(scope, node, NamespaceId::ElementListeners, &event_type)
            .is_some();
        if listening {
            ctx.view.dom_mut().add_event_listener(target, &event_type)?;
        } else {
            ctx.view.dom_mut().remove_event_listener(target, &event_type)?;
        }
        Ok(())
    })
}

fn text_binding<D: Dom + 'static>(node: NodeId) -> BindingBody<D> {
    Box::new(move |ctx: &mut BindContext<D>, scope: &mut ClientScope| {
        let Some(target) = ctx.view.element(node) else {
            return Ok(());
        };
        let text = ctx
            .tree
            .get_tracked(scope, node, NamespaceId::TextNode, TEXT_KEY)
            .and_then(ChangeValue::as_literal)
            .map(Value::to_display_string)
            .unwrap_or_default();
        ctx.view.dom_mut().set_text(target, &text)?;
        Ok(())
    })
}

fn class_binding<D: Dom + 'static>(node: NodeId) -> BindingBody<D> {
    Box::new(move |ctx: &mut BindContext<D>, scope: &mut ClientScope| {
        let Some(target) = ctx.view.element(node) else {
            return Ok(());
        };
        let classes: Vec<String> = ctx
            .tree
            .list_tracked(scope, node, NamespaceId::ClassList)
            .iter()
            .filter_map(ChangeValue::as_literal)
            .map(Value::to_display_string)
            .collect();
        if classes.is_empty() {
            ctx.view.dom_mut().remove_attribute(target, "class")?;
        } else {
            ctx.view.dom_mut().set_attribute(target, "class", &classes.join(" "))?;
        }
        Ok(())
    })
}

fn template_binding<D: Dom + 'static>(node: NodeId, property: String, model_key: String) -> BindingBody<D> {
    Box::new(move |ctx: &mut BindContext<D>, scope: &mut ClientScope| {
        let Some(target) = ctx.view.element(node) else {
            return Ok(());
        };
        match ctx
            .tree
            .get_tracked(scope, node, NamespaceId::TemplateBinding, &model_key)
            .and_then(ChangeValue::as_literal)
        {
            Some(value) => ctx.view.dom_mut().set_property(target, &property, value)?,
            None => ctx.view.dom_mut().remove_property(target, &property)?,
        }
        Ok(())
    })
}
