//! Integration tests for the state tree and transaction log

use mirror_core::{
    ChangeKind, ChangeRecord, ChangeValue, NamespaceId, NamespaceSnapshot, NodeId, NodeRole,
    TreeSnapshot, Value,
};
use mirror_tree::{NodeChange, NodeKey, NodeValue, StateTree, TransactionLog, TransactionLogBuilder};
use proptest::prelude::*;
use std::collections::BTreeMap;

const PROPS: NamespaceId = NamespaceId::ElementProperties;
const CHILDREN: NamespaceId = NamespaceId::ElementChildren;
const CLASSES: NamespaceId = NamespaceId::ClassList;

/// Minimal replica that applies batches and checks reference ordering
#[derive(Default)]
struct Mirror {
    nodes: BTreeMap<NodeId, (NodeRole, BTreeMap<NamespaceId, NamespaceSnapshot>)>,
}

impl Mirror {
    fn apply(&mut self, log: &TransactionLog) -> Result<(), String> {
        for record in &log.changes {
            for target in record.referenced_nodes() {
                if !self.nodes.contains_key(&target) {
                    return Err(format!("{} references unknown {}", record, target));
                }
            }
            self.apply_record(record)?;
        }
        Ok(())
    }

    fn apply_record(&mut self, record: &ChangeRecord) -> Result<(), String> {
        if let ChangeKind::Attach { role } = record.kind {
            return match self.nodes.insert(record.node, (role, BTreeMap::new())) {
                None => Ok(()),
                Some(_) => Err(format!("duplicate attach of {}", record.node)),
            };
        }
        if record.is_detach() {
            self.nodes.remove(&record.node);
            return Ok(());
        }

        let (_, namespaces) = self
            .nodes
            .get_mut(&record.node)
            .ok_or_else(|| format!("record for unknown {}", record.node))?;
        match &record.kind {
            ChangeKind::Put { ns, key, value } => {
                if let NamespaceSnapshot::Map(map) = namespaces
                    .entry(*ns)
                    .or_insert_with(|| NamespaceSnapshot::Map(BTreeMap::new()))
                {
                    map.insert(key.clone(), value.clone());
                }
            }
            ChangeKind::Remove { ns, key } => {
                if let Some(NamespaceSnapshot::Map(map)) = namespaces.get_mut(ns) {
                    map.remove(key);
                }
            }
            ChangeKind::ListInsert { ns, index, items } => {
                let list = list_of(namespaces, *ns);
                if *index > list.len() {
                    return Err(format!("insert past the end in {}", record));
                }
                list.splice(*index..*index, items.iter().cloned());
            }
            ChangeKind::ListRemove { ns, index, count } => {
                let list = list_of(namespaces, *ns);
                if index + count > list.len() {
                    return Err(format!("remove past the end in {}", record));
                }
                list.drain(*index..*index + *count);
            }
            ChangeKind::ListReplace { ns, index, value } => {
                let list = list_of(namespaces, *ns);
                let slot = list
                    .get_mut(*index)
                    .ok_or_else(|| format!("replace past the end in {}", record))?;
                *slot = value.clone();
            }
            ChangeKind::ListClear { ns } => list_of(namespaces, *ns).clear(),
            ChangeKind::Attach { .. } | ChangeKind::Detach => {}
        }
        Ok(())
    }

    fn snapshot(&self) -> TreeSnapshot {
        let mut snapshot = TreeSnapshot::new();
        for (id, (role, namespaces)) in &self.nodes {
            snapshot.insert(*id, *role, namespaces.clone());
        }
        snapshot
    }
}

fn list_of(
    namespaces: &mut BTreeMap<NamespaceId, NamespaceSnapshot>,
    ns: NamespaceId,
) -> &mut Vec<ChangeValue> {
    let entry = namespaces
        .entry(ns)
        .or_insert_with(|| NamespaceSnapshot::List(Vec::new()));
    if let NamespaceSnapshot::Map(_) = entry {
        *entry = NamespaceSnapshot::List(Vec::new());
    }
    match entry {
        NamespaceSnapshot::List(list) => list,
        NamespaceSnapshot::Map(_) => unreachable!("replaced above"),
    }
}

fn build(tree: &mut StateTree) -> TransactionLog {
    TransactionLogBuilder::new(tree).build().unwrap()
}

fn sync(tree: &mut StateTree, mirror: &mut Mirror) {
    let log = build(tree);
    mirror.apply(&log).unwrap();
}

#[test]
fn test_double_set_of_hi_produces_single_put() {
    let mut tree = StateTree::default();
    let mut mirror = Mirror::default();
    sync(&mut tree, &mut mirror);

    let root = tree.root();
    tree.put(root, PROPS, "greeting", "hi").unwrap();
    tree.put(root, PROPS, "greeting", "hi").unwrap();

    let log = build(&mut tree);
    assert_eq!(
        log.changes,
        vec![ChangeRecord::new(
            NodeId::ROOT,
            ChangeKind::Put {
                ns: PROPS,
                key: "greeting".into(),
                value: ChangeValue::Literal(Value::from("hi")),
            },
        )]
    );
}

#[test]
fn test_attach_then_remove_child_is_invisible() {
    let mut tree = StateTree::default();
    let mut mirror = Mirror::default();
    sync(&mut tree, &mut mirror);

    let root = tree.root();
    let child = tree.create_element("div");
    tree.push(root, CHILDREN, child).unwrap();
    tree.remove_at(root, CHILDREN, 0).unwrap();

    assert!(build(&mut tree).changes.is_empty());
}

#[test]
fn test_splice_scenario_reaches_client() {
    let mut tree = StateTree::default();
    let mut mirror = Mirror::default();
    let root = tree.root();
    for class in ["a", "b", "c"] {
        tree.push(root, CLASSES, class).unwrap();
    }
    sync(&mut tree, &mut mirror);

    let outcome = tree
        .splice(root, CLASSES, 1, 1, vec![NodeValue::from("x"), NodeValue::from("y")])
        .unwrap();
    assert_eq!(outcome.removed, vec![NodeValue::from("b")]);

    let log = build(&mut tree);
    assert_eq!(
        log.changes,
        vec![
            ChangeRecord::new(NodeId::ROOT, ChangeKind::ListRemove { ns: CLASSES, index: 1, count: 1 }),
            ChangeRecord::new(
                NodeId::ROOT,
                ChangeKind::ListInsert {
                    ns: CLASSES,
                    index: 1,
                    items: vec![
                        ChangeValue::Literal(Value::from("x")),
                        ChangeValue::Literal(Value::from("y")),
                    ],
                },
            ),
        ]
    );
    mirror.apply(&log).unwrap();
    assert_eq!(mirror.snapshot(), tree.snapshot());
}

#[test]
fn test_ids_are_never_reused() {
    let mut tree = StateTree::default();
    let root = tree.root();
    let mut seen = Vec::new();
    for _ in 0..5 {
        let child = tree.create_element("li");
        tree.push(root, CHILDREN, child).unwrap();
        seen.push(tree.node_id(child).unwrap());
        tree.remove_at(root, CHILDREN, 0).unwrap();
        build(&mut tree);
    }
    let mut deduped = seen.clone();
    deduped.dedup();
    assert_eq!(seen, deduped);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_resync_replays_whole_tree() {
    let mut tree = StateTree::default();
    let mut mirror = Mirror::default();
    let root = tree.root();
    let list = tree.create_element("ul");
    tree.push(root, CHILDREN, list).unwrap();
    let item = tree.create_text("first");
    tree.push(list, CHILDREN, item).unwrap();
    sync(&mut tree, &mut mirror);

    tree.reset_reporting();
    let log = build(&mut tree);
    assert_eq!(log.stats.attaches, 3);

    let mut fresh = Mirror::default();
    fresh.apply(&log).unwrap();
    assert_eq!(fresh.snapshot(), tree.snapshot());
}

#[test]
fn test_collect_twice_returns_nothing() {
    let mut tree = StateTree::default();
    let root = tree.root();
    let first = tree.collect_changes(root).unwrap();
    assert!(matches!(first[0], NodeChange::Attach { .. }));
    assert!(tree.collect_changes(root).unwrap().is_empty());
}

#[derive(Debug, Clone)]
enum TreeOp {
    Append { parent: usize, text: bool },
    SetProp { node: usize, key: usize, value: i64 },
    RemoveProp { node: usize, key: usize },
    RemoveChild { node: usize, index: usize },
    AddClass { node: usize, index: usize, value: i64 },
    ReplaceClass { node: usize, index: usize, value: i64 },
    ClearClasses { node: usize },
    Sync,
}

fn tree_op() -> impl Strategy<Value = TreeOp> {
    prop_oneof![
        4 => (0usize..16, any::<bool>()).prop_map(|(parent, text)| TreeOp::Append { parent, text }),
        4 => (0usize..16, 0usize..3, 0i64..3).prop_map(|(node, key, value)| TreeOp::SetProp { node, key, value }),
        2 => (0usize..16, 0usize..3).prop_map(|(node, key)| TreeOp::RemoveProp { node, key }),
        2 => (0usize..16, 0usize..4).prop_map(|(node, index)| TreeOp::RemoveChild { node, index }),
        3 => (0usize..16, 0usize..4, 0i64..5).prop_map(|(node, index, value)| TreeOp::AddClass { node, index, value }),
        2 => (0usize..16, 0usize..4, 0i64..5).prop_map(|(node, index, value)| TreeOp::ReplaceClass { node, index, value }),
        1 => (0usize..16).prop_map(|node| TreeOp::ClearClasses { node }),
        2 => Just(TreeOp::Sync),
    ]
}

const KEYS: [&str; 3] = ["a", "b", "c"];

fn run_op(tree: &mut StateTree, elements: &mut Vec<NodeKey>, mirror: &mut Mirror, op: TreeOp) -> Result<(), String> {
    let pick = |n: usize| elements[n % elements.len()];
    // Rejected mutations leave the tree unchanged, so their errors are ignored
    match op {
        TreeOp::Append { parent, text } => {
            let parent = pick(parent);
            let child = if text {
                tree.create_text("t")
            } else {
                let element = tree.create_element("div");
                elements.push(element);
                element
            };
            let _ = tree.push(parent, CHILDREN, child);
        }
        TreeOp::SetProp { node, key, value } => {
            let _ = tree.put(pick(node), PROPS, KEYS[key], value);
        }
        TreeOp::RemoveProp { node, key } => {
            let _ = tree.remove(pick(node), PROPS, KEYS[key]);
        }
        TreeOp::RemoveChild { node, index } => {
            let _ = tree.remove_at(pick(node), CHILDREN, index);
        }
        TreeOp::AddClass { node, index, value } => {
            let _ = tree.insert_at(pick(node), CLASSES, index, value);
        }
        TreeOp::ReplaceClass { node, index, value } => {
            let _ = tree.set_item(pick(node), CLASSES, index, value);
        }
        TreeOp::ClearClasses { node } => {
            let _ = tree.clear_list(pick(node), CLASSES);
        }
        TreeOp::Sync => {
            let log = TransactionLogBuilder::new(tree).build().map_err(|e| e.to_string())?;
            mirror.apply(&log)?;
        }
    }
    Ok(())
}

proptest! {
    #[test]
    fn batches_are_linearly_applicable(ops in prop::collection::vec(tree_op(), 1..60)) {
        let mut tree = StateTree::default();
        let mut elements = vec![tree.root()];
        let mut mirror = Mirror::default();

        for op in ops {
            let result = run_op(&mut tree, &mut elements, &mut mirror, op);
            prop_assert!(result.is_ok(), "{:?}", result);
        }
        let result = run_op(&mut tree, &mut elements, &mut mirror, TreeOp::Sync);
        prop_assert!(result.is_ok(), "{:?}", result);
        prop_assert_eq!(mirror.snapshot(), tree.snapshot());
    }

    #[test]
    fn map_changes_coalesce_per_key(
        ops in prop::collection::vec((0usize..3, prop::option::of(0i64..3)), 0..30),
    ) {
        let mut tree = StateTree::default();
        let root = tree.root();
        tree.put(root, PROPS, "a", 0i64).unwrap();
        build(&mut tree);
        let before = tree.snapshot();

        for (key, value) in ops {
            match value {
                Some(v) => { tree.put(root, PROPS, KEYS[key], v).unwrap(); }
                None => { tree.remove(root, PROPS, KEYS[key]).unwrap(); }
            }
        }
        let log = build(&mut tree);

        let mut touched: Vec<&str> = Vec::new();
        for record in &log.changes {
            let key = match &record.kind {
                ChangeKind::Put { key, .. } | ChangeKind::Remove { key, .. } => key.as_str(),
                other => return Err(TestCaseError::fail(format!("unexpected {:?}", other))),
            };
            prop_assert!(!touched.contains(&key), "key {} emitted twice", key);
            touched.push(key);
        }

        let mut mirror = Mirror::default();
        mirror.nodes.insert(
            NodeId::ROOT,
            (NodeRole::Element, before.nodes[&NodeId::ROOT].namespaces.clone()),
        );
        prop_assert!(mirror.apply(&log).is_ok());
        prop_assert_eq!(mirror.snapshot(), tree.snapshot());
    }
}
