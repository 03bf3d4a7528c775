//! Template definitions
//!
//! A template is structural metadata sent once per client: a static element
//! shape whose properties are bound to model keys of a template-bound node.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Static element shape with model bindings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateDefinition {
    /// Element tag
    pub tag: String,
    /// Static attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Static text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Element property name to model key
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub bindings: BTreeMap<String, String>,
    /// Static child elements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TemplateDefinition>,
}

impl TemplateDefinition {
    /// Create an empty definition for `tag`
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attributes: BTreeMap::new(),
            text: None,
            bindings: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Add a static attribute
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Set static text content
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Bind an element property to a model key
    pub fn with_binding(mut self, property: impl Into<String>, model_key: impl Into<String>) -> Self {
        self.bindings.insert(property.into(), model_key.into());
        self
    }

    /// Add a static child
    pub fn with_child(mut self, child: TemplateDefinition) -> Self {
        self.children.push(child);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_shape() {
        let def = TemplateDefinition::new("span")
            .with_attribute("class", "badge")
            .with_binding("title", "label");
        let json = serde_json::to_string(&def).unwrap();
        assert_eq!(json, r#"{"tag":"span","attributes":{"class":"badge"},"bindings":{"title":"label"}}"#);
        let back: TemplateDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, def);
    }
}
