//! A server session replicated into a client over the wire format

use mirror_client::{ClientConfig, ClientReplica, Dom, MemoryDom};
use mirror_core::{NamespaceId, NodeId, TemplateDefinition, Value, TEXT_KEY};
use mirror_protocol::{Invocation, ServerMessage};
use mirror_server::{SessionConfig, SessionError, UiEvent, UiSession};
use mirror_tree::{NodeKey, StateTree};
use proptest::prelude::*;

const PROPS: NamespaceId = NamespaceId::ElementProperties;
const CHILDREN: NamespaceId = NamespaceId::ElementChildren;
const CLASSES: NamespaceId = NamespaceId::ClassList;

fn connect() -> (UiSession, ClientReplica<MemoryDom>) {
    let mut session = UiSession::new(SessionConfig::with_token("token"));
    let mut replica = ClientReplica::new(ClientConfig::with_token("token"), MemoryDom::default());
    let boot = session.resynchronize().unwrap();
    replica.receive(boot).unwrap();
    (session, replica)
}

/// Ship `message` through JSON, as a transport would
fn deliver(replica: &mut ClientReplica<MemoryDom>, message: Option<ServerMessage>) {
    if let Some(message) = message {
        replica.receive_json(&message.to_json().unwrap()).unwrap();
    }
}

/// Every rendered element's document children follow its tree children
fn assert_dom_follows_tree(replica: &ClientReplica<MemoryDom>) {
    let tree = replica.tree();
    for id in tree.ids() {
        let Some(dom_node) = replica.dom_node(id) else {
            continue;
        };
        let expected: Vec<NodeId> = tree
            .list(id, CHILDREN)
            .iter()
            .filter_map(|c| c.node_id())
            .collect();
        let actual: Vec<NodeId> = replica
            .dom()
            .children(dom_node)
            .iter()
            .filter_map(|d| replica.view().node_for(*d))
            .collect();
        assert_eq!(actual, expected, "children of {}", id);
    }
}

#[test]
fn test_replica_matches_session() {
    let (mut session, mut replica) = connect();
    let (_, message) = session
        .access(|s| {
            let root = s.tree().root();
            let list = s.tree_mut().create_element("ul");
            s.tree_mut().push(list, CLASSES, "todo")?;
            for label in ["milk", "eggs"] {
                let item = s.tree_mut().create_element("li");
                let text = s.tree_mut().create_text(label);
                s.tree_mut().push(item, CHILDREN, text)?;
                s.tree_mut().push(list, CHILDREN, item)?;
            }
            s.tree_mut().push(root, CHILDREN, list)
        })
        .unwrap();
    deliver(&mut replica, message);

    assert_eq!(replica.snapshot(), session.snapshot());
    assert_eq!(
        replica.dom().render(),
        "<body><ul class=\"todo\"><li>milk</li><li>eggs</li></ul></body>"
    );
    assert_dom_follows_tree(&replica);
}

#[test]
fn test_removed_subtree_is_released() {
    let (mut session, mut replica) = connect();
    let (_, message) = session
        .access(|s| {
            let root = s.tree().root();
            let section = s.tree_mut().create_element("section");
            let heading = s.tree_mut().create_element("h1");
            let text = s.tree_mut().create_text("title");
            s.tree_mut().push(heading, CHILDREN, text)?;
            s.tree_mut().push(section, CHILDREN, heading)?;
            s.tree_mut().push(root, CHILDREN, section)
        })
        .unwrap();
    deliver(&mut replica, message);
    assert_eq!(replica.dom().len(), 4);
    let bindings = replica.binding_count();

    let (_, message) = session
        .access(|s| {
            let root = s.tree().root();
            s.tree_mut().remove_at(root, CHILDREN, 0)
        })
        .unwrap();
    deliver(&mut replica, message);

    assert_eq!(replica.snapshot(), session.snapshot());
    assert_eq!(replica.dom().render(), "<body></body>");
    assert_eq!(replica.dom().len(), 1);
    assert!(replica.binding_count() < bindings);
}

#[test]
fn test_parent_removes_child_touched_earlier_in_the_turn() {
    let (mut session, mut replica) = connect();
    let (outer, message) = session
        .access(|s| {
            let root = s.tree().root();
            let outer = s.tree_mut().create_element("div");
            s.tree_mut().push(root, CHILDREN, outer)?;
            Ok::<NodeKey, mirror_tree::TreeError>(outer)
        })
        .unwrap();
    let outer = outer.unwrap();
    deliver(&mut replica, message);

    let (_, message) = session
        .access(|s| {
            let root = s.tree().root();
            let inner = s.tree_mut().create_element("div");
            s.tree_mut().push(outer, CHILDREN, inner)?;
            s.tree_mut().clear_list(root, CHILDREN)
        })
        .unwrap();
    deliver(&mut replica, message);

    assert_eq!(replica.stats().fatal_errors, 0);
    assert_eq!(replica.snapshot(), session.snapshot());
    assert_eq!(replica.dom().render(), "<body></body>");
    assert_eq!(replica.dom().len(), 1);
}

#[test]
fn test_dom_event_round_trip() {
    let (mut session, mut replica) = connect();
    let (_, message) = session
        .access(|s| {
            let root = s.tree().root();
            let input = s.tree_mut().create_element("input");
            let echo = s.tree_mut().create_text("");
            s.tree_mut().push(root, CHILDREN, input)?;
            s.tree_mut().push(root, CHILDREN, echo)?;
            s.add_event_listener(input, "change", &["value"], move |tree: &mut StateTree, _: &UiEvent| {
                let typed = tree
                    .get(input, PROPS, "value")?
                    .and_then(|v| v.as_literal())
                    .map(Value::to_display_string)
                    .unwrap_or_default();
                tree.put(echo, NamespaceId::TextNode, TEXT_KEY, typed)?;
                Ok(())
            })?;
            Ok::<_, SessionError>(())
        })
        .unwrap();
    deliver(&mut replica, message);

    let input = replica.dom().find("input").unwrap();
    assert!(replica.dom().has_listener(input, "change"));

    // The user types, then the change event fires
    replica
        .dom_mut()
        .set_property(input, "value", &Value::from("typed"))
        .unwrap();
    assert!(replica.dom_event(input, "change", Value::Null).unwrap());

    let outgoing = replica.take_message().unwrap();
    assert_eq!(outgoing.invocations.len(), 2);
    assert!(outgoing.invocations[0].is_property_sync());
    assert!(matches!(&outgoing.invocations[1], Invocation::Event { event_type, .. } if event_type == "change"));

    let reply = session.handle_message(outgoing).unwrap().into_message().unwrap();
    assert_eq!(reply.changes.len(), 1);
    deliver(&mut replica, Some(reply));

    assert_eq!(replica.snapshot(), session.snapshot());
    assert_eq!(replica.dom().render(), "<body><input></input>typed</body>");
}

#[test]
fn test_handler_restoring_value_reaches_document() {
    let (mut session, mut replica) = connect();
    let (_, message) = session
        .access(|s| {
            let root = s.tree().root();
            let input = s.tree_mut().create_element("input");
            s.tree_mut().put(input, PROPS, "value", "a")?;
            s.tree_mut().push(root, CHILDREN, input)?;
            s.add_event_listener(input, "change", &["value"], move |tree: &mut StateTree, _: &UiEvent| {
                tree.put(input, PROPS, "value", "a")?;
                Ok(())
            })?;
            Ok::<_, SessionError>(())
        })
        .unwrap();
    deliver(&mut replica, message);

    let input = replica.dom().find("input").unwrap();
    replica
        .dom_mut()
        .set_property(input, "value", &Value::from("b"))
        .unwrap();
    assert!(replica.dom_event(input, "change", Value::Null).unwrap());

    let outgoing = replica.take_message().unwrap();
    let reply = session.handle_message(outgoing).unwrap().into_message().unwrap();
    assert_eq!(reply.changes.len(), 1);
    deliver(&mut replica, Some(reply));

    assert_eq!(replica.snapshot(), session.snapshot());
    assert_eq!(replica.dom().property(input, "value"), Some(Value::from("a")));
}

#[test]
fn test_event_without_listener_is_ignored() {
    let (_, mut replica) = connect();
    let root = replica.dom().root();
    assert!(!replica.dom_event(root, "click", Value::Null).unwrap());
    assert!(replica.take_message().is_none());
}

#[test]
fn test_requested_resync_rebuilds_document() {
    let (mut session, mut replica) = connect();
    let (_, message) = session
        .access(|s| {
            let root = s.tree().root();
            let para = s.tree_mut().create_element("p");
            s.tree_mut().put(para, NamespaceId::ElementAttributes, "id", "intro")?;
            s.tree_mut().push(root, CHILDREN, para)
        })
        .unwrap();
    deliver(&mut replica, message);

    replica.request_resync();
    let request = replica.take_message().unwrap();
    assert!(request.resynchronize);
    let reply = session.handle_message(request).unwrap().into_message().unwrap();
    assert!(reply.resync);
    deliver(&mut replica, Some(reply));

    // The initial load was a resync too
    assert_eq!(replica.stats().resyncs, 2);
    assert_eq!(replica.snapshot(), session.snapshot());
    assert_eq!(replica.dom().render(), "<body><p id=\"intro\"></p></body>");
    assert_eq!(replica.dom().len(), replica.tree().len());
}

#[test]
fn test_template_node_renders_definition() {
    let (mut session, mut replica) = connect();
    let template = session.tree_mut().register_template(
        TemplateDefinition::new("span")
            .with_attribute("class", "badge")
            .with_text("!")
            .with_binding("title", "label"),
    );
    let (badge, message) = session
        .access(|s| {
            let root = s.tree().root();
            let badge = s.tree_mut().create_template_node(template)?;
            s.tree_mut().put(badge, NamespaceId::TemplateBinding, "label", "new")?;
            s.tree_mut().push(root, CHILDREN, badge)?;
            Ok::<NodeKey, mirror_tree::TreeError>(badge)
        })
        .unwrap();
    let badge = badge.unwrap();
    deliver(&mut replica, message);

    let span = replica.dom().find("span").unwrap();
    assert_eq!(replica.dom().render(), "<body><span class=\"badge\">!</span></body>");
    assert_eq!(replica.dom().property(span, "title"), Some(Value::from("new")));

    let (_, message) = session
        .access(|s| s.tree_mut().put(badge, NamespaceId::TemplateBinding, "label", "seen"))
        .unwrap();
    deliver(&mut replica, message);
    assert_eq!(replica.dom().property(span, "title"), Some(Value::from("seen")));
    assert_eq!(replica.snapshot(), session.snapshot());
}

#[test]
fn test_failing_binding_does_not_stop_others() {
    let (mut session, mut replica) = connect();
    replica.dom_mut().fail_property(Some("value"));
    let (input, message) = session
        .access(|s| {
            let root = s.tree().root();
            let input = s.tree_mut().create_element("input");
            s.tree_mut().put(input, PROPS, "value", "a")?;
            s.tree_mut().put(input, PROPS, "title", "t")?;
            s.tree_mut().push(root, CHILDREN, input)?;
            Ok::<NodeKey, mirror_tree::TreeError>(input)
        })
        .unwrap();
    let input = input.unwrap();
    deliver(&mut replica, message);

    let dom_input = replica.dom().find("input").unwrap();
    assert_eq!(replica.stats().binding_failures, 1);
    assert_eq!(replica.dom().property(dom_input, "title"), Some(Value::from("t")));
    assert_eq!(replica.dom().property(dom_input, "value"), None);

    replica.dom_mut().fail_property(None);
    let (_, message) = session
        .access(|s| s.tree_mut().put(input, PROPS, "value", "b"))
        .unwrap();
    deliver(&mut replica, message);
    assert_eq!(replica.dom().property(dom_input, "value"), Some(Value::from("b")));
}

#[derive(Debug, Clone)]
enum Op {
    AddChild { parent: usize, text: bool },
    SetProperty { node: usize, value: i64 },
    RemoveProperty { node: usize },
    AddClass { node: usize, class: u8 },
    RemoveChild { parent: usize, index: usize },
    ClearChildren { parent: usize },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (any::<usize>(), any::<bool>()).prop_map(|(parent, text)| Op::AddChild { parent, text }),
        2 => (any::<usize>(), 0i64..4).prop_map(|(node, value)| Op::SetProperty { node, value }),
        1 => any::<usize>().prop_map(|node| Op::RemoveProperty { node }),
        1 => (any::<usize>(), 0u8..3).prop_map(|(node, class)| Op::AddClass { node, class }),
        2 => (any::<usize>(), any::<usize>()).prop_map(|(parent, index)| Op::RemoveChild { parent, index }),
        1 => any::<usize>().prop_map(|parent| Op::ClearChildren { parent }),
    ]
}

fn apply_op(tree: &mut StateTree, elements: &mut Vec<NodeKey>, op: &Op) -> mirror_tree::TreeResult<()> {
    let attached: Vec<NodeKey> = elements.iter().copied().filter(|k| tree.is_attached(*k)).collect();
    let pick = |i: usize| attached[i % attached.len()];
    match *op {
        Op::AddChild { parent, text } => {
            let parent = pick(parent);
            let child = if text {
                tree.create_text("t")
            } else {
                let child = tree.create_element("div");
                elements.push(child);
                child
            };
            tree.push(parent, CHILDREN, child)
        }
        Op::SetProperty { node, value } => tree.put(pick(node), PROPS, "p", value).map(|_| ()),
        Op::RemoveProperty { node } => tree.remove(pick(node), PROPS, "p").map(|_| ()),
        Op::AddClass { node, class } => tree.push(pick(node), CLASSES, format!("c{}", class)),
        Op::RemoveChild { parent, index } => {
            let parent = pick(parent);
            let len = tree.list_len(parent, CHILDREN)?;
            if len > 0 {
                tree.remove_at(parent, CHILDREN, index % len)?;
            }
            Ok(())
        }
        Op::ClearChildren { parent } => tree.clear_list(pick(parent), CHILDREN).map(|_| ()),
    }
}

proptest! {
    #[test]
    fn prop_replica_follows_session(batches in prop::collection::vec(prop::collection::vec(op_strategy(), 1..6), 1..8)) {
        let (mut session, mut replica) = connect();
        let mut elements = vec![session.tree().root()];

        for ops in &batches {
            let (result, message) = session
                .access(|s| {
                    for op in ops {
                        apply_op(s.tree_mut(), &mut elements, op)?;
                    }
                    Ok::<(), mirror_tree::TreeError>(())
                })
                .unwrap();
            prop_assert!(result.is_ok());
            deliver(&mut replica, message);

            prop_assert_eq!(replica.snapshot(), session.snapshot());
            prop_assert_eq!(replica.dom().len(), replica.tree().len());
            assert_dom_follows_tree(&replica);
        }
        prop_assert_eq!(replica.stats().fatal_errors, 0);
    }
}
