//! Change record codec
//!
//! Node references travel as plain integers; the change type says whether a
//! value is data or a node id. A list insert mixing literals and nodes is
//! therefore split into homogeneous runs. Template references are sent as a
//! `put` of the template id under [`TEMPLATE_KEY`] of the template binding
//! namespace, the only place they may appear.

use crate::error::{ProtocolError, ProtocolResult};
use crate::wire::{WireChange, WireChangeType};
use mirror_core::{
    ChangeKind, ChangeRecord, ChangeValue, NamespaceId, NodeId, TemplateId, Value, TEMPLATE_KEY,
};

/// Encode records in order
pub fn encode_changes(records: &[ChangeRecord]) -> Vec<WireChange> {
    records.iter().flat_map(encode_change).collect()
}

/// Encode one record; a mixed list insert yields several wire changes
pub fn encode_change(record: &ChangeRecord) -> Vec<WireChange> {
    let id = record.node;
    match &record.kind {
        ChangeKind::Attach { role } => vec![WireChange::new(id, WireChangeType::Attach).with_role(*role)],
        ChangeKind::Detach => vec![WireChange::new(id, WireChangeType::Detach)],
        ChangeKind::Put { ns, key, value } => {
            let change_type = if value.is_node() {
                WireChangeType::PutNode
            } else {
                WireChangeType::Put
            };
            vec![WireChange::new(id, change_type)
                .with_ns(*ns)
                .with_key(key.clone())
                .with_value(encode_value(value))]
        }
        ChangeKind::Remove { ns, key } => {
            vec![WireChange::new(id, WireChangeType::Remove).with_ns(*ns).with_key(key.clone())]
        }
        ChangeKind::ListInsert { ns, index, items } => {
            let mut changes = Vec::new();
            let mut start = 0;
            while start < items.len() {
                let nodes = items[start].is_node();
                let run = items[start..]
                    .iter()
                    .take_while(|item| item.is_node() == nodes)
                    .count();
                let change_type = if nodes {
                    WireChangeType::ListInsertNode
                } else {
                    WireChangeType::ListInsert
                };
                let values = items[start..start + run].iter().map(encode_value).collect();
                changes.push(
                    WireChange::new(id, change_type)
                        .with_ns(*ns)
                        .with_index(index + start)
                        .with_value(Value::Array(values)),
                );
                start += run;
            }
            changes
        }
        ChangeKind::ListRemove { ns, index, count } => vec![WireChange::new(id, WireChangeType::ListRemove)
            .with_ns(*ns)
            .with_index(*index)
            .with_count(*count)],
        ChangeKind::ListReplace { ns, index, value } => {
            let change_type = if value.is_node() {
                WireChangeType::ListReplaceNode
            } else {
                WireChangeType::ListReplace
            };
            vec![WireChange::new(id, change_type)
                .with_ns(*ns)
                .with_index(*index)
                .with_value(encode_value(value))]
        }
        ChangeKind::ListClear { ns } => vec![WireChange::new(id, WireChangeType::ListClear).with_ns(*ns)],
    }
}

fn encode_value(value: &ChangeValue) -> Value {
    match value {
        ChangeValue::Literal(v) => v.clone(),
        ChangeValue::Node(id) => Value::Int(id.raw() as i64),
        ChangeValue::Template(id) => Value::Int(id.raw() as i64),
    }
}

/// Decode wire changes in order
pub fn decode_changes(changes: &[WireChange]) -> ProtocolResult<Vec<ChangeRecord>> {
    changes.iter().map(decode_change).collect()
}

/// Decode one wire change
pub fn decode_change(change: &WireChange) -> ProtocolResult<ChangeRecord> {
    let change_type: WireChangeType = change
        .change_type
        .parse()
        .map_err(ProtocolError::UnknownChangeType)?;
    let fields = Fields { change, change_type };

    let kind = match change_type {
        WireChangeType::Attach => ChangeKind::Attach {
            role: change.role.ok_or_else(|| fields.missing("role"))?,
        },
        WireChangeType::Detach => ChangeKind::Detach,
        WireChangeType::Put => {
            let ns = fields.ns()?;
            let key = fields.key()?;
            let value = change.value.clone().unwrap_or(Value::Null);
            let value = if ns == NamespaceId::TemplateBinding && key == TEMPLATE_KEY {
                ChangeValue::Template(TemplateId::new(fields.id_from(&value)?))
            } else {
                ChangeValue::Literal(value)
            };
            ChangeKind::Put { ns, key, value }
        }
        WireChangeType::PutNode => ChangeKind::Put {
            ns: fields.ns()?,
            key: fields.key()?,
            value: ChangeValue::Node(fields.node_ref(fields.value()?)?),
        },
        WireChangeType::Remove => ChangeKind::Remove {
            ns: fields.ns()?,
            key: fields.key()?,
        },
        WireChangeType::ListInsert | WireChangeType::ListInsertNode => {
            let items = fields
                .value()?
                .as_array()
                .ok_or_else(|| fields.invalid("list inserts carry an array"))?;
            let items = if change_type.carries_nodes() {
                items
                    .iter()
                    .map(|item| fields.node_ref(item).map(ChangeValue::Node))
                    .collect::<ProtocolResult<_>>()?
            } else {
                items.iter().cloned().map(ChangeValue::Literal).collect()
            };
            ChangeKind::ListInsert {
                ns: fields.ns()?,
                index: fields.index()?,
                items,
            }
        }
        WireChangeType::ListRemove => ChangeKind::ListRemove {
            ns: fields.ns()?,
            index: fields.index()?,
            count: change.count.ok_or_else(|| fields.missing("count"))?,
        },
        WireChangeType::ListReplace => ChangeKind::ListReplace {
            ns: fields.ns()?,
            index: fields.index()?,
            value: ChangeValue::Literal(change.value.clone().unwrap_or(Value::Null)),
        },
        WireChangeType::ListReplaceNode => ChangeKind::ListReplace {
            ns: fields.ns()?,
            index: fields.index()?,
            value: ChangeValue::Node(fields.node_ref(fields.value()?)?),
        },
        WireChangeType::ListClear => ChangeKind::ListClear { ns: fields.ns()? },
    };
    Ok(ChangeRecord::new(change.id, kind))
}

/// Field accessors producing typed errors
struct Fields<'a> {
    change: &'a WireChange,
    change_type: WireChangeType,
}

impl<'a> Fields<'a> {
    fn missing(&self, field: &'static str) -> ProtocolError {
        ProtocolError::MissingField {
            node: self.change.id,
            change: self.change_type.as_str(),
            field,
        }
    }

    fn invalid(&self, reason: &'static str) -> ProtocolError {
        ProtocolError::InvalidValue {
            node: self.change.id,
            change: self.change_type.as_str(),
            reason,
        }
    }

    fn ns(&self) -> ProtocolResult<NamespaceId> {
        self.change.ns.ok_or_else(|| self.missing("ns"))
    }

    fn key(&self) -> ProtocolResult<String> {
        self.change.key.clone().ok_or_else(|| self.missing("key"))
    }

    fn index(&self) -> ProtocolResult<usize> {
        self.change.index.ok_or_else(|| self.missing("index"))
    }

    fn value(&self) -> ProtocolResult<&'a Value> {
        self.change.value.as_ref().ok_or_else(|| self.missing("value"))
    }

    fn id_from(&self, value: &Value) -> ProtocolResult<u32> {
        value
            .as_int()
            .and_then(|raw| u32::try_from(raw).ok())
            .filter(|raw| *raw > 0)
            .ok_or_else(|| self.invalid("expected a positive integer id"))
    }

    fn node_ref(&self, value: &Value) -> ProtocolResult<NodeId> {
        match value {
            Value::Int(raw) => u32::try_from(*raw)
                .ok()
                .filter(|raw| *raw > 0)
                .map(NodeId::new)
                .ok_or(ProtocolError::InvalidNodeReference {
                    node: self.change.id,
                    change: self.change_type.as_str(),
                }),
            _ => Err(ProtocolError::InvalidNodeReference {
                node: self.change.id,
                change: self.change_type.as_str(),
            }),
        }
    }
}
