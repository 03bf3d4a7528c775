//! Reactive source keys
//!
//! A source is anything a computation can read: one property, or the shape of
//! a namespace (its key set or list order). The node handle type is generic so
//! the server keys sources by arena key and the client by wire id.

use mirror_core::NamespaceId;

/// Something a computation can depend on
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceKey<N> {
    /// A single property of a map namespace
    Property { node: N, ns: NamespaceId, key: String },
    /// Key set of a map namespace or item order of a list namespace
    Structure { node: N, ns: NamespaceId },
}

impl<N> SourceKey<N> {
    /// Source for one property
    pub fn property(node: N, ns: NamespaceId, key: impl Into<String>) -> Self {
        Self::Property {
            node,
            ns,
            key: key.into(),
        }
    }

    /// Source for a namespace's structure
    pub fn structure(node: N, ns: NamespaceId) -> Self {
        Self::Structure { node, ns }
    }

    /// Node owning the source
    pub fn node(&self) -> &N {
        match self {
            Self::Property { node, .. } | Self::Structure { node, .. } => node,
        }
    }

    /// Namespace of the source
    pub fn namespace(&self) -> NamespaceId {
        match self {
            Self::Property { ns, .. } | Self::Structure { ns, .. } => *ns,
        }
    }
}
