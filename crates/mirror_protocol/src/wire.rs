//! Wire form of a change record

use mirror_core::{NamespaceId, NodeId, NodeRole, Value};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Change type tag as it appears in the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireChangeType {
    Attach,
    Detach,
    Put,
    PutNode,
    Remove,
    ListInsert,
    ListInsertNode,
    ListRemove,
    ListReplace,
    ListReplaceNode,
    ListClear,
}

impl WireChangeType {
    /// Every change type
    pub const ALL: [WireChangeType; 11] = [
        Self::Attach,
        Self::Detach,
        Self::Put,
        Self::PutNode,
        Self::Remove,
        Self::ListInsert,
        Self::ListInsertNode,
        Self::ListRemove,
        Self::ListReplace,
        Self::ListReplaceNode,
        Self::ListClear,
    ];

    /// Tag string
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Attach => "attach",
            Self::Detach => "detach",
            Self::Put => "put",
            Self::PutNode => "putNode",
            Self::Remove => "remove",
            Self::ListInsert => "listInsert",
            Self::ListInsertNode => "listInsertNode",
            Self::ListRemove => "listRemove",
            Self::ListReplace => "listReplace",
            Self::ListReplaceNode => "listReplaceNode",
            Self::ListClear => "listClear",
        }
    }

    /// Whether the value of this change holds node ids
    pub const fn carries_nodes(self) -> bool {
        matches!(self, Self::PutNode | Self::ListInsertNode | Self::ListReplaceNode)
    }
}

impl FromStr for WireChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

impl fmt::Display for WireChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One change as carried in the `changes` array.
///
/// The type is kept as a string so an unknown tag surfaces as a protocol
/// error from the codec instead of a generic JSON error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireChange {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub change_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ns: Option<NamespaceId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// A put of null is sent without a value and decoded back to null
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<NodeRole>,
}

impl WireChange {
    /// Change of `change_type` for `id` with every optional field empty
    pub fn new(id: NodeId, change_type: WireChangeType) -> Self {
        Self {
            id,
            change_type: change_type.as_str().to_string(),
            ns: None,
            key: None,
            index: None,
            count: None,
            value: None,
            role: None,
        }
    }

    pub fn with_ns(mut self, ns: NamespaceId) -> Self {
        self.ns = Some(ns);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Set the value; null is left out
    pub fn with_value(mut self, value: Value) -> Self {
        self.value = (!value.is_null()).then_some(value);
        self
    }

    pub fn with_role(mut self, role: NodeRole) -> Self {
        self.role = Some(role);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_tags_parse() {
        for t in WireChangeType::ALL {
            assert_eq!(t.as_str().parse::<WireChangeType>(), Ok(t));
        }
        assert!("splice".parse::<WireChangeType>().is_err());
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let change = WireChange::new(NodeId::new(3), WireChangeType::Detach);
        assert_eq!(serde_json::to_string(&change).unwrap(), r#"{"id":3,"type":"detach"}"#);

        let put = WireChange::new(NodeId::new(3), WireChangeType::Put)
            .with_ns(NamespaceId::ElementProperties)
            .with_key("value")
            .with_value(Value::from("hi"));
        assert_eq!(
            serde_json::to_string(&put).unwrap(),
            r#"{"id":3,"type":"put","ns":1,"key":"value","value":"hi"}"#
        );
    }
}
