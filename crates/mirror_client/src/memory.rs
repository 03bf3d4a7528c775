//! In-memory document
//!
//! A headless [`Dom`] used by tests and the demo runtime. It renders to a
//! compact HTML-like string and can be told to fail on a property name.

use crate::dom::{Dom, DomError, DomNodeId, DomResult};
use mirror_core::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

#[derive(Debug, Clone)]
enum MemoryKind {
    Element { tag: String },
    Text,
}

#[derive(Debug, Clone)]
struct MemoryNode {
    kind: MemoryKind,
    text: String,
    properties: BTreeMap<String, Value>,
    attributes: BTreeMap<String, String>,
    listeners: BTreeSet<String>,
    children: Vec<DomNodeId>,
    parent: Option<DomNodeId>,
}

impl MemoryNode {
    fn new(kind: MemoryKind) -> Self {
        Self {
            kind,
            text: String::new(),
            properties: BTreeMap::new(),
            attributes: BTreeMap::new(),
            listeners: BTreeSet::new(),
            children: Vec::new(),
            parent: None,
        }
    }
}

/// Headless document
#[derive(Debug, Clone)]
pub struct MemoryDom {
    nodes: HashMap<DomNodeId, MemoryNode>,
    next_id: u64,
    root: DomNodeId,
    failing_property: Option<String>,
    operations: u64,
}

impl MemoryDom {
    /// Document with an empty root element
    pub fn new(root_tag: &str) -> Self {
        let root = DomNodeId(1);
        let mut nodes = HashMap::new();
        nodes.insert(
            root,
            MemoryNode::new(MemoryKind::Element {
                tag: root_tag.to_string(),
            }),
        );
        Self {
            nodes,
            next_id: 2,
            root,
            failing_property: None,
            operations: 0,
        }
    }

    /// Make every write of `name` fail, or stop doing so with `None`
    pub fn fail_property(&mut self, name: Option<&str>) {
        self.failing_property = name.map(str::to_string);
    }

    /// Number of mutating calls so far
    pub fn operations(&self) -> u64 {
        self.operations
    }

    /// Number of live nodes, the root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether only the root is left
    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn contains(&self, node: DomNodeId) -> bool {
        self.nodes.contains_key(&node)
    }

    /// Tag of an element
    pub fn tag(&self, node: DomNodeId) -> Option<&str> {
        match &self.nodes.get(&node)?.kind {
            MemoryKind::Element { tag } => Some(tag.as_str()),
            MemoryKind::Text => None,
        }
    }

    /// Text of a text node
    pub fn text(&self, node: DomNodeId) -> Option<&str> {
        let node = self.nodes.get(&node)?;
        match node.kind {
            MemoryKind::Text => Some(node.text.as_str()),
            MemoryKind::Element { .. } => None,
        }
    }

    pub fn attribute(&self, node: DomNodeId, name: &str) -> Option<&str> {
        self.nodes.get(&node)?.attributes.get(name).map(String::as_str)
    }

    pub fn children(&self, node: DomNodeId) -> &[DomNodeId] {
        self.nodes
            .get(&node)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    pub fn parent(&self, node: DomNodeId) -> Option<DomNodeId> {
        self.nodes.get(&node)?.parent
    }

    /// Whether `event_type` is reported on `node`
    pub fn has_listener(&self, node: DomNodeId, event_type: &str) -> bool {
        self.nodes
            .get(&node)
            .map_or(false, |n| n.listeners.contains(event_type))
    }

    /// Find the first element with `tag` in document order
    pub fn find(&self, tag: &str) -> Option<DomNodeId> {
        self.find_all(tag).into_iter().next()
    }

    /// Every element with `tag` in document order
    pub fn find_all(&self, tag: &str) -> Vec<DomNodeId> {
        let mut found = Vec::new();
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.nodes.get(&id) else {
                continue;
            };
            if matches!(&node.kind, MemoryKind::Element { tag: t } if t == tag) {
                found.push(id);
            }
            stack.extend(node.children.iter().rev());
        }
        found
    }

    /// Render the document below the root.
    ///
    /// Elements render with their attributes in name order; properties are
    /// not part of the output.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(self.root, &mut out);
        out
    }

    fn render_into(&self, id: DomNodeId, out: &mut String) {
        let Some(node) = self.nodes.get(&id) else {
            return;
        };
        match &node.kind {
            MemoryKind::Text => out.push_str(&node.text),
            MemoryKind::Element { tag } => {
                out.push('<');
                out.push_str(tag);
                for (name, value) in &node.attributes {
                    out.push_str(&format!(" {}=\"{}\"", name, value));
                }
                out.push('>');
                for child in &node.children {
                    self.render_into(*child, out);
                }
                out.push_str(&format!("</{}>", tag));
            }
        }
    }

    fn node_mut(&mut self, id: DomNodeId) -> DomResult<&mut MemoryNode> {
        self.operations += 1;
        self.nodes.get_mut(&id).ok_or(DomError::UnknownNode(id))
    }

    fn element_mut(&mut self, id: DomNodeId) -> DomResult<&mut MemoryNode> {
        let node = self.node_mut(id)?;
        match node.kind {
            MemoryKind::Element { .. } => Ok(node),
            MemoryKind::Text => Err(DomError::NotAnElement(id)),
        }
    }

    fn check_failure(&self, name: &str) -> DomResult<()> {
        match &self.failing_property {
            Some(failing) if failing == name => {
                Err(DomError::Failed(format!("writing '{}' is rigged to fail", name)))
            }
            _ => Ok(()),
        }
    }

    fn insert(&mut self, node: MemoryNode) -> DomNodeId {
        let id = DomNodeId(self.next_id);
        self.next_id += 1;
        self.operations += 1;
        self.nodes.insert(id, node);
        id
    }
}

impl Default for MemoryDom {
    fn default() -> Self {
        Self::new("body")
    }
}

impl Dom for MemoryDom {
    fn root(&self) -> DomNodeId {
        self.root
    }

    fn create_element(&mut self, tag: &str) -> DomNodeId {
        self.insert(MemoryNode::new(MemoryKind::Element {
            tag: tag.to_string(),
        }))
    }

    fn create_text(&mut self, text: &str) -> DomNodeId {
        let mut node = MemoryNode::new(MemoryKind::Text);
        node.text = text.to_string();
        self.insert(node)
    }

    fn set_text(&mut self, node: DomNodeId, text: &str) -> DomResult<()> {
        let target = self.node_mut(node)?;
        match target.kind {
            MemoryKind::Text => {
                target.text = text.to_string();
                Ok(())
            }
            MemoryKind::Element { .. } => {
                Err(DomError::Failed(format!("{} is an element, not text", node)))
            }
        }
    }

    fn set_property(&mut self, node: DomNodeId, name: &str, value: &Value) -> DomResult<()> {
        self.check_failure(name)?;
        self.element_mut(node)?
            .properties
            .insert(name.to_string(), value.clone());
        Ok(())
    }

    fn remove_property(&mut self, node: DomNodeId, name: &str) -> DomResult<()> {
        self.check_failure(name)?;
        self.element_mut(node)?.properties.remove(name);
        Ok(())
    }

    fn property(&self, node: DomNodeId, name: &str) -> Option<Value> {
        self.nodes.get(&node)?.properties.get(name).cloned()
    }

    fn set_attribute(&mut self, node: DomNodeId, name: &str, value: &str) -> DomResult<()> {
        self.element_mut(node)?
            .attributes
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn remove_attribute(&mut self, node: DomNodeId, name: &str) -> DomResult<()> {
        self.element_mut(node)?.attributes.remove(name);
        Ok(())
    }

    fn add_event_listener(&mut self, node: DomNodeId, event_type: &str) -> DomResult<()> {
        self.element_mut(node)?
            .listeners
            .insert(event_type.to_string());
        Ok(())
    }

    fn remove_event_listener(&mut self, node: DomNodeId, event_type: &str) -> DomResult<()> {
        self.element_mut(node)?.listeners.remove(event_type);
        Ok(())
    }

    fn splice_children(
        &mut self,
        parent: DomNodeId,
        index: usize,
        remove_count: usize,
        added: &[DomNodeId],
    ) -> DomResult<()> {
        for child in added {
            match self.nodes.get(child) {
                None => return Err(DomError::UnknownNode(*child)),
                Some(node) if node.parent.is_some() => {
                    return Err(DomError::AlreadyAttached(*child))
                }
                Some(_) => {}
            }
        }
        let target = self.element_mut(parent)?;
        let len = target.children.len();
        if index.checked_add(remove_count).map_or(true, |end| end > len) {
            return Err(DomError::IndexOutOfBounds {
                parent,
                index,
                count: remove_count,
                len,
            });
        }

        let removed: Vec<DomNodeId> = target
            .children
            .splice(index..index + remove_count, added.iter().copied())
            .collect();
        for child in removed {
            if let Some(node) = self.nodes.get_mut(&child) {
                node.parent = None;
            }
        }
        for child in added {
            if let Some(node) = self.nodes.get_mut(child) {
                node.parent = Some(parent);
            }
        }
        Ok(())
    }

    fn child_count(&self, node: DomNodeId) -> usize {
        self.children(node).len()
    }

    fn release(&mut self, node: DomNodeId) {
        if node == self.root {
            return;
        }
        self.operations += 1;
        let Some(released) = self.nodes.remove(&node) else {
            return;
        };
        if let Some(parent) = released.parent.and_then(|p| self.nodes.get_mut(&p)) {
            parent.children.retain(|c| *c != node);
        }
        for child in released.children {
            if let Some(orphan) = self.nodes.get_mut(&child) {
                orphan.parent = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splice_and_render() {
        let mut dom = MemoryDom::default();
        let root = dom.root();
        let list = dom.create_element("ul");
        let a = dom.create_text("a");
        let b = dom.create_text("b");
        let c = dom.create_text("c");
        dom.splice_children(list, 0, 0, &[a, b, c]).unwrap();
        dom.splice_children(root, 0, 0, &[list]).unwrap();
        dom.set_attribute(list, "class", "items").unwrap();
        assert_eq!(dom.render(), "<body><ul class=\"items\">abc</ul></body>");

        let x = dom.create_text("x");
        dom.splice_children(list, 1, 1, &[x]).unwrap();
        assert_eq!(dom.render(), "<body><ul class=\"items\">axc</ul></body>");
        assert_eq!(dom.parent(b), None);
        assert_eq!(dom.parent(x), Some(list));
    }

    #[test]
    fn test_splice_rejects_attached_child() {
        let mut dom = MemoryDom::default();
        let root = dom.root();
        let item = dom.create_element("li");
        dom.splice_children(root, 0, 0, &[item]).unwrap();
        assert_eq!(
            dom.splice_children(root, 1, 0, &[item]),
            Err(DomError::AlreadyAttached(item))
        );
        assert!(matches!(
            dom.splice_children(root, 2, 0, &[]),
            Err(DomError::IndexOutOfBounds { len: 1, .. })
        ));
    }

    #[test]
    fn test_rigged_property_fails() {
        let mut dom = MemoryDom::default();
        let root = dom.root();
        dom.fail_property(Some("value"));
        assert!(dom.set_property(root, "value", &Value::from("x")).is_err());
        assert!(dom.set_property(root, "title", &Value::from("x")).is_ok());
        dom.fail_property(None);
        assert!(dom.set_property(root, "value", &Value::from("x")).is_ok());
    }

    #[test]
    fn test_release_detaches_from_parent() {
        let mut dom = MemoryDom::default();
        let root = dom.root();
        let item = dom.create_element("li");
        dom.splice_children(root, 0, 0, &[item]).unwrap();
        dom.release(item);
        assert_eq!(dom.child_count(root), 0);
        assert!(!dom.contains(item));
        dom.release(root);
        assert!(dom.contains(root));
    }
}
