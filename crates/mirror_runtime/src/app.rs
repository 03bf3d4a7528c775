//! Demo application: a todo list
//!
//! ```text
//! body
//!  ├─ h1 "Todo"
//!  ├─ input        change → syncs `value`
//!  ├─ button "Add" click  → appends an li, clears the input
//!  ├─ ul.items     keeps a server-only count of items ever added
//!  ├─ p  "<n> items"      computation over the list length
//!  └─ span.badge          template, title bound to the last location
//! ```

use mirror_core::{NamespaceId, TemplateDefinition, Value, TEXT_KEY};
use mirror_server::{Navigation, SessionResult, UiEvent, UiSession};
use mirror_tree::{NodeKey, StateTree, TreeScope};

const PROPS: NamespaceId = NamespaceId::ElementProperties;
const CHILDREN: NamespaceId = NamespaceId::ElementChildren;
const ADDED: &str = "added";

/// Nodes of the installed application
#[derive(Debug, Clone, Copy)]
pub struct TodoApp {
    pub input: NodeKey,
    pub button: NodeKey,
    pub list: NodeKey,
    pub counter: NodeKey,
    pub badge: NodeKey,
}

/// Build the application into the session's root
pub fn install(session: &mut UiSession) -> SessionResult<TodoApp> {
    let badge_template = session.tree_mut().register_template(
        TemplateDefinition::new("span")
            .with_attribute("class", "badge")
            .with_text("@")
            .with_binding("title", "location"),
    );

    let tree = session.tree_mut();
    let root = tree.root();
    tree.mark_server_only_key(PROPS, ADDED)?;

    let heading = tree.create_element("h1");
    let heading_text = tree.create_text("Todo");
    tree.push(heading, CHILDREN, heading_text)?;

    let input = tree.create_element("input");
    tree.put(input, NamespaceId::ElementAttributes, "placeholder", "What needs doing?")?;
    tree.put(input, PROPS, "value", "")?;

    let button = tree.create_element("button");
    let button_text = tree.create_text("Add");
    tree.push(button, CHILDREN, button_text)?;

    let list = tree.create_element("ul");
    tree.push(list, NamespaceId::ClassList, "items")?;

    let counter_element = tree.create_element("p");
    let counter = tree.create_text("");
    tree.push(counter_element, CHILDREN, counter)?;

    let badge = tree.create_template_node(badge_template)?;
    tree.put(badge, NamespaceId::TemplateBinding, "location", "/")?;

    for child in [heading, input, button, list, counter_element, badge] {
        tree.push(root, CHILDREN, child)?;
    }

    session.add_event_listener(input, "change", &["value"], |_: &mut StateTree, event: &UiEvent| {
        log::debug!("Input changed on {}", event.node_id);
        Ok(())
    })?;
    session.add_event_listener(button, "click", &[], move |tree: &mut StateTree, _: &UiEvent| {
        add_item(tree, input, list)
    })?;
    session.set_navigation_handler(move |tree: &mut StateTree, navigation: &Navigation| {
        tree.put(
            badge,
            NamespaceId::TemplateBinding,
            "location",
            navigation.location.as_str(),
        )?;
        Ok(())
    });
    session.create_computation(
        counter,
        "item counter",
        move |tree: &mut StateTree, scope: &mut TreeScope| {
            let count = tree.list_tracked(scope, list, CHILDREN)?.len();
            let label = match count {
                1 => "1 item".to_string(),
                n => format!("{} items", n),
            };
            tree.put(counter, NamespaceId::TextNode, TEXT_KEY, label)?;
            Ok(())
        },
    )?;

    Ok(TodoApp {
        input,
        button,
        list,
        counter,
        badge,
    })
}

/// Append the typed text as a new item and clear the input
fn add_item(tree: &mut StateTree, input: NodeKey, list: NodeKey) -> mirror_tree::TreeResult<()> {
    let typed = tree
        .get(input, PROPS, "value")?
        .and_then(|v| v.as_literal())
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string();
    if typed.is_empty() {
        log::debug!("Ignoring click with an empty input");
        return Ok(());
    }

    let item = tree.create_element("li");
    let text = tree.create_text(&typed);
    tree.push(item, CHILDREN, text)?;
    tree.push(list, CHILDREN, item)?;
    tree.put(input, PROPS, "value", "")?;

    let added = tree
        .get(list, PROPS, ADDED)?
        .and_then(|v| v.as_literal())
        .and_then(Value::as_int)
        .unwrap_or(0);
    tree.put(list, PROPS, ADDED, added + 1)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_protocol::{ClientMessage, Invocation};
    use mirror_server::SessionConfig;

    fn message(id: u64, invocations: Vec<Invocation>) -> ClientMessage {
        ClientMessage {
            csrf_token: String::new(),
            sync_id: 0,
            client_message_id: id,
            resynchronize: false,
            invocations,
        }
    }

    #[test]
    fn test_click_adds_typed_item() {
        let mut session = UiSession::new(SessionConfig::default());
        let app = install(&mut session).unwrap();
        session.resynchronize().unwrap();

        let input = session.tree().node_id(app.input).unwrap();
        let button = session.tree().node_id(app.button).unwrap();
        let reply = session
            .handle_message(message(
                0,
                vec![
                    Invocation::PropertySync {
                        node_id: input,
                        property: "value".into(),
                        value: Value::from("milk"),
                    },
                    Invocation::Event {
                        node_id: button,
                        event_type: "click".into(),
                        event_data: Value::Null,
                    },
                ],
            ))
            .unwrap()
            .into_message()
            .unwrap();

        assert_eq!(session.tree().list_len(app.list, CHILDREN).unwrap(), 1);
        assert!(session.tree().has(app.list, PROPS, ADDED).unwrap());
        assert!(reply.changes.iter().all(|c| c.key.as_deref() != Some(ADDED)));
        let counter = session.tree().get(app.counter, NamespaceId::TextNode, TEXT_KEY).unwrap();
        assert_eq!(counter.and_then(|v| v.as_literal()), Some(&Value::from("1 item")));
    }
}
