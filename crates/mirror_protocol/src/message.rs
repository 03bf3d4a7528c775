//! Message envelopes
//!
//! ```text
//! server → client  { syncId, clientAck, resync?, changes, newMetadata?, timing }
//! client → server  { csrfToken, syncId, clientMessageId, resynchronize?, invocations }
//! ```

use crate::error::ProtocolResult;
use crate::wire::WireChange;
use mirror_core::{NodeId, TemplateDefinition, TemplateId, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

fn is_false(b: &bool) -> bool {
    !*b
}

/// Server to client batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    /// Sequence number of this message, starting at 0
    pub sync_id: u64,
    /// Next client message id the server expects
    pub client_ack: u64,
    /// Whether the client must drop its tree before applying `changes`
    #[serde(default, skip_serializing_if = "is_false")]
    pub resync: bool,
    pub changes: Vec<WireChange>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub new_metadata: BTreeMap<TemplateId, TemplateDefinition>,
    /// Server processing time in ms: cumulative, then for this message
    pub timing: [u64; 2],
}

impl ServerMessage {
    /// Serialize to JSON
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Whether the message carries no tree changes
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.new_metadata.is_empty()
    }
}

/// Client to server message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMessage {
    pub csrf_token: String,
    /// Next server sync id the client expects
    pub sync_id: u64,
    /// Strictly increasing per client, starting at 0
    pub client_message_id: u64,
    /// Ask the server for a full snapshot
    #[serde(default, skip_serializing_if = "is_false")]
    pub resynchronize: bool,
    #[serde(default)]
    pub invocations: Vec<Invocation>,
}

impl ClientMessage {
    /// Serialize to JSON
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse from JSON
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Something the client asks the server to do
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Invocation {
    /// A DOM event fired on a node
    #[serde(rename_all = "camelCase")]
    Event {
        node_id: NodeId,
        event_type: String,
        #[serde(default = "Value::null")]
        event_data: Value,
    },
    /// The client changed a property the server listens to
    #[serde(rename_all = "camelCase")]
    PropertySync {
        node_id: NodeId,
        property: String,
        value: Value,
    },
    /// The client navigated
    Navigation {
        #[serde(default = "Value::null")]
        state: Value,
        location: String,
    },
}

impl Invocation {
    /// Node targeted by the invocation
    pub fn node_id(&self) -> Option<NodeId> {
        match self {
            Self::Event { node_id, .. } | Self::PropertySync { node_id, .. } => Some(*node_id),
            Self::Navigation { .. } => None,
        }
    }

    /// Whether this is a property sync
    pub fn is_property_sync(&self) -> bool {
        matches!(self, Self::PropertySync { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::WireChangeType;
    use mirror_core::NodeRole;

    #[test]
    fn test_server_message_json_shape() {
        let message = ServerMessage {
            sync_id: 3,
            client_ack: 2,
            resync: false,
            changes: vec![WireChange::new(NodeId::ROOT, WireChangeType::Attach).with_role(NodeRole::Element)],
            new_metadata: BTreeMap::new(),
            timing: [12, 1],
        };
        let json = message.to_json().unwrap();
        assert_eq!(
            json,
            r#"{"syncId":3,"clientAck":2,"changes":[{"id":1,"type":"attach","role":"element"}],"timing":[12,1]}"#
        );
        assert_eq!(ServerMessage::from_json(&json).unwrap(), message);
    }

    #[test]
    fn test_metadata_keys_round_trip() {
        let mut new_metadata = BTreeMap::new();
        new_metadata.insert(TemplateId::new(1), TemplateDefinition::new("span"));
        let message = ServerMessage {
            sync_id: 0,
            client_ack: 0,
            resync: true,
            changes: Vec::new(),
            new_metadata,
            timing: [0, 0],
        };
        let json = message.to_json().unwrap();
        assert!(json.contains(r#""newMetadata":{"1":{"tag":"span"}}"#));
        assert!(json.contains(r#""resync":true"#));
        assert_eq!(ServerMessage::from_json(&json).unwrap(), message);
    }

    #[test]
    fn test_client_message_parse() {
        let json = r#"{
            "csrfToken": "token",
            "syncId": 4,
            "clientMessageId": 7,
            "invocations": [
                {"type": "propertySync", "nodeId": 5, "property": "value", "value": "hi"},
                {"type": "event", "nodeId": 6, "eventType": "click", "eventData": {"button": 0}},
                {"type": "navigation", "location": "/todo"}
            ]
        }"#;
        let message = ClientMessage::from_json(json).unwrap();
        assert!(!message.resynchronize);
        assert_eq!(message.invocations.len(), 3);
        assert_eq!(
            message.invocations[0],
            Invocation::PropertySync {
                node_id: NodeId::new(5),
                property: "value".into(),
                value: Value::from("hi"),
            }
        );
        assert_eq!(message.invocations[1].node_id(), Some(NodeId::new(6)));
        assert!(matches!(
            &message.invocations[2],
            Invocation::Navigation { state: Value::Null, location } if location == "/todo"
        ));
    }

    #[test]
    fn test_malformed_message_is_an_error() {
        assert!(ClientMessage::from_json("{\"csrfToken\": 1}").is_err());
    }
}
