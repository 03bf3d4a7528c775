//! Namespace catalogue
//!
//! Every node carries a small, fixed set of namespaces determined by its
//! [`NodeRole`]. The set is closed: both replicas must agree on every id, so
//! namespaces are an enum with stable wire codes rather than an open registry.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Key in [`NamespaceId::ElementData`] holding the element tag name
pub const TAG_KEY: &str = "tag";

/// Key in [`NamespaceId::TextNode`] holding the text content
pub const TEXT_KEY: &str = "text";

/// Key in [`NamespaceId::TemplateBinding`] holding the template reference
pub const TEMPLATE_KEY: &str = "template";

/// Shape of the container behind a namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    /// String key to property
    Map,
    /// Ordered sequence of values
    List,
}

/// Identifier of a namespace, encoded as a small integer on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum NamespaceId {
    /// Static element data such as the tag name
    ElementData,
    /// DOM properties
    ElementProperties,
    /// DOM attributes
    ElementAttributes,
    /// Event type to list of properties synced with the event
    ElementListeners,
    /// Child nodes
    ElementChildren,
    /// CSS class names
    ClassList,
    /// Text node content
    TextNode,
    /// Template reference plus the model values its bindings read
    TemplateBinding,
}

impl NamespaceId {
    /// Every namespace, in wire-code order
    pub const ALL: [NamespaceId; 8] = [
        Self::ElementData,
        Self::ElementProperties,
        Self::ElementAttributes,
        Self::ElementListeners,
        Self::ElementChildren,
        Self::ClassList,
        Self::TextNode,
        Self::TemplateBinding,
    ];

    /// Wire code
    pub const fn code(self) -> u8 {
        match self {
            Self::ElementData => 0,
            Self::ElementProperties => 1,
            Self::ElementAttributes => 2,
            Self::ElementListeners => 3,
            Self::ElementChildren => 4,
            Self::ClassList => 5,
            Self::TextNode => 6,
            Self::TemplateBinding => 7,
        }
    }

    /// Decode a wire code
    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.get(code as usize).copied()
    }

    /// Slot index for per-node namespace tables
    pub const fn index(self) -> usize {
        self.code() as usize
    }

    /// Container shape
    pub const fn kind(self) -> NamespaceKind {
        match self {
            Self::ElementChildren | Self::ClassList => NamespaceKind::List,
            _ => NamespaceKind::Map,
        }
    }

    /// Whether this is a list namespace
    pub const fn is_list(self) -> bool {
        matches!(self.kind(), NamespaceKind::List)
    }

    /// Human-readable name
    pub const fn name(self) -> &'static str {
        match self {
            Self::ElementData => "elementData",
            Self::ElementProperties => "elementProperties",
            Self::ElementAttributes => "elementAttributes",
            Self::ElementListeners => "elementListeners",
            Self::ElementChildren => "elementChildren",
            Self::ClassList => "classList",
            Self::TextNode => "textNode",
            Self::TemplateBinding => "templateBinding",
        }
    }
}

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<NamespaceId> for u8 {
    fn from(ns: NamespaceId) -> u8 {
        ns.code()
    }
}

/// Wire code that names no namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unknown namespace code {0}")]
pub struct UnknownNamespace(pub u8);

impl TryFrom<u8> for NamespaceId {
    type Error = UnknownNamespace;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or(UnknownNamespace(code))
    }
}

/// Role of a node, fixing the namespaces it may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeRole {
    /// Plain DOM element
    Element,
    /// DOM text node
    Text,
    /// Element stamped out from a registered template
    TemplateBound,
}

impl NodeRole {
    /// Namespaces allowed for this role
    pub const fn namespaces(self) -> &'static [NamespaceId] {
        match self {
            Self::Element => &[
                NamespaceId::ElementData,
                NamespaceId::ElementProperties,
                NamespaceId::ElementAttributes,
                NamespaceId::ElementListeners,
                NamespaceId::ElementChildren,
                NamespaceId::ClassList,
            ],
            Self::Text => &[NamespaceId::TextNode],
            Self::TemplateBound => &[NamespaceId::TemplateBinding],
        }
    }

    /// Whether `ns` is allowed for this role
    pub fn allows(self, ns: NamespaceId) -> bool {
        self.namespaces().contains(&ns)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Element => write!(f, "element"),
            Self::Text => write!(f, "text"),
            Self::TemplateBound => write!(f, "templateBound"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_round_trip() {
        for ns in NamespaceId::ALL {
            assert_eq!(NamespaceId::from_code(ns.code()), Some(ns));
        }
        assert_eq!(NamespaceId::try_from(42u8), Err(UnknownNamespace(42)));
    }

    #[test]
    fn test_namespace_serializes_as_code() {
        assert_eq!(serde_json::to_string(&NamespaceId::ElementChildren).unwrap(), "4");
        let ns: NamespaceId = serde_json::from_str("6").unwrap();
        assert_eq!(ns, NamespaceId::TextNode);
        assert!(serde_json::from_str::<NamespaceId>("99").is_err());
    }

    #[test]
    fn test_role_namespaces() {
        assert!(NodeRole::Element.allows(NamespaceId::ElementChildren));
        assert!(!NodeRole::Element.allows(NamespaceId::TextNode));
        assert!(NodeRole::Text.allows(NamespaceId::TextNode));
        assert_eq!(NodeRole::TemplateBound.namespaces(), &[NamespaceId::TemplateBinding]);
        assert_eq!(serde_json::to_string(&NodeRole::TemplateBound).unwrap(), "\"templateBound\"");
    }

    #[test]
    fn test_kinds() {
        assert!(NamespaceId::ClassList.is_list());
        assert_eq!(NamespaceId::ElementAttributes.kind(), NamespaceKind::Map);
    }
}
