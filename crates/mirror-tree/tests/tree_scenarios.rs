// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! End-to-end tree behavior: routing, silent application, and snapshots
//! exercised through the root node the way a dispatcher drives them.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use mirror_tree::{
    CellDecl, CellKind, ElementDecl, NodeRef, NodeSchema, Path, TreeError, Value,
};

fn box_schema() -> NodeSchema {
    NodeSchema::builder("BoxState")
        .cell("pos", CellDecl::new(CellKind::Any, Value::Null))
        .build()
        .unwrap()
}

fn world_schema() -> NodeSchema {
    NodeSchema::builder("WorldState")
        .cell("counter", CellDecl::new(CellKind::I64, 0i64))
        .list("boxes", ElementDecl::Node(box_schema()))
        .map("counters", ElementDecl::Scalar(CellKind::I64))
        .build()
        .unwrap()
}

fn vec2(x: f64, y: f64) -> Value {
    Value::map_of([("x", x), ("y", y)])
}

fn box_item(x: f64, y: f64) -> Value {
    Value::map_of([("pos", vec2(x, y))])
}

struct Probe {
    outgoing: Rc<RefCell<Vec<(String, Option<Value>)>>>,
    patched: Rc<RefCell<Vec<String>>>,
    snapshots: Rc<Cell<u32>>,
    _subs: Vec<mirror_tree::Subscription>,
}

fn probe(root: &NodeRef) -> Probe {
    let outgoing = Rc::new(RefCell::new(Vec::new()));
    let patched = Rc::new(RefCell::new(Vec::new()));
    let snapshots = Rc::new(Cell::new(0));
    let (o, p, s) = (
        Rc::clone(&outgoing),
        Rc::clone(&patched),
        Rc::clone(&snapshots),
    );
    let subs = vec![
        root.subscribe_changes(move |chg| {
            o.borrow_mut().push((chg.path.to_string(), chg.new.clone()));
        }),
        root.on_patched(move |path| p.borrow_mut().push(path.to_string())),
        root.on_snapshot_applied(move |_: &()| s.set(s.get() + 1)),
    ];
    Probe {
        outgoing,
        patched,
        snapshots,
        _subs: subs,
    }
}

fn apply(root: &NodeRef, literal: &str, value: Option<Value>) -> Result<(), TreeError> {
    let path = Path::parse(literal).unwrap();
    root.apply_patch(&path, value.as_ref())
}

#[test]
fn received_insert_retags_existing_subscriptions() {
    let root = NodeRef::new(&world_schema());
    root.list("boxes").unwrap().add(box_item(0.0, 0.0)).unwrap();
    let probe = probe(&root);

    apply(
        &root,
        "boxes.insert",
        Some(Value::map_of([
            ("index", Value::I64(0)),
            ("item", box_item(9.0, 9.0)),
        ])),
    )
    .unwrap();

    // The receive side emitted nothing outgoing.
    assert!(probe.outgoing.borrow().is_empty());
    assert_eq!(&*probe.patched.borrow(), &["boxes.insert".to_owned()]);

    // The pre-existing element now lives (and bubbles) at index 1.
    let boxes = root.list("boxes").unwrap();
    assert_eq!(boxes.get(0).unwrap(), box_item(9.0, 9.0));
    boxes
        .node_at(1)
        .unwrap()
        .cell("pos")
        .unwrap()
        .set(vec2(2.0, 2.0))
        .unwrap();
    assert_eq!(probe.outgoing.borrow()[0].0, "boxes.[1].pos");
}

#[test]
fn received_move_reorders_with_one_patched_signal() {
    let root = NodeRef::new(&world_schema());
    let boxes = root.list("boxes").unwrap();
    for i in 0..3 {
        boxes.add(box_item(f64::from(i), 0.0)).unwrap();
    }
    let probe = probe(&root);

    apply(
        &root,
        "boxes.move",
        Some(Value::map_of([("from", Value::I64(2)), ("to", Value::I64(0))])),
    )
    .unwrap();

    assert_eq!(boxes.get(0).unwrap(), box_item(2.0, 0.0));
    assert_eq!(boxes.get(1).unwrap(), box_item(0.0, 0.0));
    assert_eq!(boxes.get(2).unwrap(), box_item(1.0, 0.0));
    assert!(probe.outgoing.borrow().is_empty());
    assert_eq!(probe.patched.borrow().len(), 1);
}

#[test]
fn out_of_range_patch_reports_the_path_and_changes_nothing() {
    let root = NodeRef::new(&world_schema());
    let boxes = root.list("boxes").unwrap();
    for i in 0..3 {
        boxes.add(box_item(f64::from(i), 0.0)).unwrap();
    }
    let probe = probe(&root);

    let err = apply(&root, "boxes.[9].pos", Some(vec2(1.0, 1.0))).unwrap_err();
    match err {
        TreeError::PathRoute { path, .. } => assert_eq!(path, "boxes.[9].pos"),
        other => panic!("expected PathRoute, got {other:?}"),
    }
    assert_eq!(boxes.len(), 3);
    assert!(probe.outgoing.borrow().is_empty());
    assert!(probe.patched.borrow().is_empty());
}

#[test]
fn received_clear_empties_the_list_silently() {
    let root = NodeRef::new(&world_schema());
    let boxes = root.list("boxes").unwrap();
    boxes.add(box_item(1.0, 1.0)).unwrap();
    let probe = probe(&root);

    apply(&root, "boxes.clear", None).unwrap();
    assert!(boxes.is_empty());
    assert!(probe.outgoing.borrow().is_empty());
    assert_eq!(probe.patched.borrow().len(), 1);
}

#[test]
fn snapshot_reconciles_map_differences_with_one_signal() {
    let root = NodeRef::new(&world_schema());
    let counters = root.map("counters").unwrap();
    counters.set("a", 1i64).unwrap();
    counters.set("b", 2i64).unwrap();

    let source = NodeRef::new(&world_schema());
    let source_counters = source.map("counters").unwrap();
    source_counters.set("a", 10i64).unwrap();
    source_counters.set("b", 20i64).unwrap();
    source_counters.set("c", 30i64).unwrap();

    let probe = probe(&root);
    root.apply_snapshot("WorldState", &source.state()).unwrap();

    assert_eq!(counters.get("a"), Some(Value::I64(10)));
    assert_eq!(counters.get("b"), Some(Value::I64(20)));
    assert_eq!(counters.get("c"), Some(Value::I64(30)));
    assert_eq!(root.state(), source.state());
    assert_eq!(probe.snapshots.get(), 1);
    assert!(probe.outgoing.borrow().is_empty());
}

#[test]
fn patch_then_get_reads_back_the_patched_value() {
    let root = NodeRef::new(&world_schema());
    apply(&root, "counter", Some(Value::I64(7))).unwrap();
    assert_eq!(root.cell("counter").unwrap().get(), Value::I64(7));

    root.list("boxes").unwrap().add(box_item(0.0, 0.0)).unwrap();
    apply(&root, "boxes.[0].pos", Some(vec2(1.0, 2.5))).unwrap();
    assert_eq!(
        root.list("boxes").unwrap().node_at(0).unwrap().cell("pos").unwrap().get(),
        vec2(1.0, 2.5)
    );
}

#[test]
fn bubbling_and_routing_are_inverses_for_cell_paths() {
    // Mutate one tree locally through typed accessors; apply the captured
    // changes as patches to a second identical tree. Both end up equal.
    let source = NodeRef::new(&world_schema());
    let replica = NodeRef::new(&world_schema());

    let captured: Rc<RefCell<Vec<(String, Option<Value>)>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&captured);
    let _sub = source.subscribe_changes(move |chg| {
        sink.borrow_mut().push((chg.path.to_string(), chg.new.clone()));
    });

    source.cell("counter").unwrap().set(5i64).unwrap();
    source.map("counters").unwrap().set("p1", 3i64).unwrap();
    source.list("boxes").unwrap().add(box_item(0.0, 0.0)).unwrap();
    source
        .list("boxes")
        .unwrap()
        .node_at(0)
        .unwrap()
        .cell("pos")
        .unwrap()
        .set(vec2(4.0, 4.0))
        .unwrap();

    // The structural add arrives as its opcode patch; everything else is a
    // plain value patch at the captured path.
    for (literal, value) in captured.borrow().iter() {
        apply(&replica, literal, value.clone()).unwrap();
    }
    assert_eq!(replica.state(), source.state());
}

#[test]
fn snapshot_failure_leaves_partial_state_and_no_signal() {
    let root = NodeRef::new(&world_schema());
    let probe = probe(&root);

    // `counter` applies, then `boxes` carries the wrong shape and fails.
    let bad = Value::map_of([
        ("counter", Value::I64(9)),
        ("boxes", Value::Bool(true)),
        ("counters", Value::map_of::<&str, Value, _>([])),
    ]);
    let err = root.apply_snapshot("WorldState", &bad).unwrap_err();
    assert!(matches!(err, TreeError::TypeMismatch { .. }));

    // Partial application is visible, but no snapshot signal fired and
    // nothing leaked outgoing.
    assert_eq!(root.cell("counter").unwrap().get(), Value::I64(9));
    assert_eq!(probe.snapshots.get(), 0);
    assert!(probe.outgoing.borrow().is_empty());
}
