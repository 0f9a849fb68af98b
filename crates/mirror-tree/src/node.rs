// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tracked composite nodes: bubbling, routing, and snapshot reconciliation.
//!
//! A node owns a fixed set of declared children, constructed eagerly from its
//! schema. Child emissions bubble through the node with the member name
//! prepended; the node never inspects the payload. The same member table
//! drives the reverse direction: remote patches route inward by head segment
//! and apply silently at a leaf.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::cell::CellRef;
use crate::change::{ChangeBus, FieldChange, Signal, Subscription};
use crate::error::TreeError;
use crate::list::ListRef;
use crate::map::MapRef;
use crate::path::{Path, Segment};
use crate::schema::{MemberKind, NodeSchema};
use crate::value::Value;

enum Member {
    Cell(CellRef, Subscription),
    Node(NodeRef, Subscription),
    List(ListRef, Subscription),
    Map(MapRef, Subscription),
}

/// Cloned-out member handle, used so routing never holds the member borrow
/// while a leaf mutation runs user handlers.
pub(crate) enum Handle {
    Cell(CellRef),
    Node(NodeRef),
    List(ListRef),
    Map(MapRef),
}

struct NodeInner {
    schema: NodeSchema,
    changes: ChangeBus,
    patched: Signal<Path>,
    snapshot_applied: Signal<()>,
    members: RefCell<Vec<Member>>,
}

/// Handle to a tracked composite node. Clones share the node.
///
/// The root node of a replicated tree doubles as the sync surface: remote
/// patches enter through [`NodeRef::apply_patch`] and snapshots through
/// [`NodeRef::apply_snapshot`]; neither ever touches the outgoing change
/// stream.
#[derive(Clone)]
pub struct NodeRef {
    inner: Rc<NodeInner>,
}

impl fmt::Debug for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeRef")
            .field("type_tag", &self.type_tag())
            .finish()
    }
}

impl NodeRef {
    /// Instantiates a node with eagerly-constructed children per `schema`.
    #[must_use]
    pub fn new(schema: &NodeSchema) -> Self {
        let node = Self {
            inner: Rc::new(NodeInner {
                schema: schema.clone(),
                changes: ChangeBus::new(),
                patched: Signal::new(),
                snapshot_applied: Signal::new(),
                members: RefCell::new(Vec::new()),
            }),
        };
        let mut members = Vec::with_capacity(schema.members().len());
        for def in schema.members() {
            let member = match &def.kind {
                MemberKind::Cell(decl) => {
                    let cell = CellRef::from_decl(decl);
                    let sub = node.wire(&def.name, cell.changes());
                    Member::Cell(cell, sub)
                }
                MemberKind::Node(child_schema) => {
                    let child = Self::new(child_schema);
                    let sub = node.wire(&def.name, child.changes_bus());
                    Member::Node(child, sub)
                }
                MemberKind::List(element) => {
                    let list = ListRef::new(element);
                    let sub = node.wire(&def.name, list.changes_bus());
                    Member::List(list, sub)
                }
                MemberKind::Map(element) => {
                    let map = MapRef::new(element);
                    let sub = node.wire(&def.name, map.changes_bus());
                    Member::Map(map, sub)
                }
            };
            members.push(member);
        }
        *node.inner.members.borrow_mut() = members;
        node
    }

    /// Identity used to validate snapshot compatibility.
    #[must_use]
    pub fn type_tag(&self) -> &str {
        self.inner.schema.type_tag()
    }

    /// The schema this node was instantiated from.
    #[must_use]
    pub fn schema(&self) -> &NodeSchema {
        &self.inner.schema
    }

    /// Subscribes to bubbled [`FieldChange`]s from this subtree.
    pub fn subscribe_changes(&self, handler: impl Fn(&FieldChange) + 'static) -> Subscription {
        self.inner.changes.subscribe(handler)
    }

    /// Subscribes to the local "a remote patch landed here" notification.
    /// Fires once per successfully applied patch, with the full path.
    pub fn on_patched(&self, handler: impl Fn(&Path) + 'static) -> Subscription {
        self.inner.patched.subscribe(handler)
    }

    /// Subscribes to the local "a snapshot was applied" notification.
    /// Fires exactly once per successful [`NodeRef::apply_snapshot`].
    pub fn on_snapshot_applied(&self, handler: impl Fn(&()) + 'static) -> Subscription {
        self.inner.snapshot_applied.subscribe(handler)
    }

    /// Typed accessor for a declared cell member.
    pub fn cell(&self, name: &str) -> Result<CellRef, TreeError> {
        match self.member_handle_by_name(name)? {
            Handle::Cell(cell) => Ok(cell),
            _ => Err(self.member_kind_err(name, "a cell")),
        }
    }

    /// Typed accessor for a declared child-node member.
    pub fn child(&self, name: &str) -> Result<Self, TreeError> {
        match self.member_handle_by_name(name)? {
            Handle::Node(node) => Ok(node),
            _ => Err(self.member_kind_err(name, "a node")),
        }
    }

    /// Typed accessor for a declared list member.
    pub fn list(&self, name: &str) -> Result<ListRef, TreeError> {
        match self.member_handle_by_name(name)? {
            Handle::List(list) => Ok(list),
            _ => Err(self.member_kind_err(name, "a list")),
        }
    }

    /// Typed accessor for a declared map member.
    pub fn map(&self, name: &str) -> Result<MapRef, TreeError> {
        match self.member_handle_by_name(name)? {
            Handle::Map(map) => Ok(map),
            _ => Err(self.member_kind_err(name, "a map")),
        }
    }

    /// Replaces a declared child node with `node`, returning the old child.
    ///
    /// Re-wiring is atomic with respect to events: the old subscription is
    /// torn down in the same step that installs the new one, and nothing can
    /// interleave on the model thread. Anything the detached child emits
    /// afterwards is dropped.
    pub fn set_child(&self, name: &str, node: Self) -> Result<Self, TreeError> {
        let Some((index, def)) = self.inner.schema.member(name) else {
            return Err(self.no_member_err(name));
        };
        let MemberKind::Node(child_schema) = &def.kind else {
            return Err(self.member_kind_err(name, "a node"));
        };
        if node.type_tag() != child_schema.type_tag() {
            return Err(TreeError::SnapshotTypeMismatch {
                expected: child_schema.type_tag().to_owned(),
                actual: node.type_tag().to_owned(),
            });
        }
        let sub = self.wire(&def.name, node.changes_bus());
        let old = {
            let mut members = self.inner.members.borrow_mut();
            std::mem::replace(&mut members[index], Member::Node(node, sub))
        };
        // Dropping `old` here tears down the old bubble subscription.
        match old {
            Member::Node(old_node, _old_sub) => Ok(old_node),
            _ => Err(self.member_kind_err(name, "a node")),
        }
    }

    /// Applies a remote patch addressed by `path`, silently.
    ///
    /// On success, fires one `patched` notification at this node. On failure
    /// the tree is untouched and no notification fires.
    pub fn apply_patch(&self, path: &Path, value: Option<&Value>) -> Result<(), TreeError> {
        self.route_apply(path, 0, value)?;
        self.inner.patched.emit(path);
        Ok(())
    }

    /// Reconciles this subtree to match `state`, walking declared members in
    /// declaration order. Fires `snapshot_applied` exactly once, after the
    /// traversal completes.
    ///
    /// Partial failure does not roll back already-applied members; the error
    /// surfaces to the caller and no `snapshot_applied` fires.
    pub fn apply_snapshot(&self, type_tag: &str, state: &Value) -> Result<(), TreeError> {
        if type_tag != self.type_tag() {
            return Err(TreeError::SnapshotTypeMismatch {
                expected: self.type_tag().to_owned(),
                actual: type_tag.to_owned(),
            });
        }
        self.apply_state(state)?;
        self.inner.snapshot_applied.emit(&());
        Ok(())
    }

    /// Extracts the full subtree state: a map of member name to member state.
    /// `apply_snapshot` of the result onto an identical tree is an identity.
    #[must_use]
    pub fn state(&self) -> Value {
        let members = self.inner.members.borrow();
        let mut out = BTreeMap::new();
        for (def, member) in self.inner.schema.members().iter().zip(members.iter()) {
            let state = match member {
                Member::Cell(cell, _) => cell.get(),
                Member::Node(node, _) => node.state(),
                Member::List(list, _) => list.state(),
                Member::Map(map, _) => map.state(),
            };
            out.insert(def.name.to_string(), state);
        }
        Value::Map(out)
    }

    pub(crate) fn changes_bus(&self) -> &ChangeBus {
        &self.inner.changes
    }

    pub(crate) fn route_apply(
        &self,
        path: &Path,
        at: usize,
        value: Option<&Value>,
    ) -> Result<(), TreeError> {
        let Some(segment) = path.segment(at) else {
            return Err(TreeError::route(path, "a patch cannot target a node"));
        };
        let Segment::Name(name) = segment else {
            return Err(TreeError::route(path, "expected a member name at a node"));
        };
        let name = Arc::clone(name);
        match self.member_handle_by_name(&name).map_err(|_| {
            TreeError::route(path, format!("no declared member {:?}", name.as_ref()))
        })? {
            Handle::Cell(cell) => {
                if path.len() > at + 1 {
                    return Err(TreeError::route(path, "path continues past a cell"));
                }
                let Some(v) = value else {
                    return Err(TreeError::route(path, "missing value for a cell patch"));
                };
                cell.apply_patch(v.clone())
            }
            Handle::Node(node) => {
                if path.len() == at + 1 {
                    return Err(TreeError::route(path, "a patch cannot target a node"));
                }
                node.route_apply(path, at + 1, value)
            }
            Handle::List(list) => list.route_apply(path, at + 1, value),
            Handle::Map(map) => map.route_apply(path, at + 1, value),
        }
    }

    pub(crate) fn apply_state(&self, state: &Value) -> Result<(), TreeError> {
        let Value::Map(entries) = state else {
            return Err(TreeError::TypeMismatch {
                expected: "map",
                actual: state.kind().name(),
            });
        };
        // Clone handles first so leaf application can run user handlers
        // without holding the member borrow.
        let handles: Vec<(Arc<str>, Handle)> = {
            let members = self.inner.members.borrow();
            self.inner
                .schema
                .members()
                .iter()
                .zip(members.iter())
                .map(|(def, member)| (Arc::clone(&def.name), member.handle()))
                .collect()
        };
        for (name, handle) in handles {
            let Some(member_state) = entries.get(name.as_ref()) else {
                return Err(TreeError::PathRoute {
                    path: name.to_string(),
                    reason: "member missing from snapshot state".to_owned(),
                });
            };
            match handle {
                Handle::Cell(cell) => cell.apply_patch(member_state.clone())?,
                Handle::Node(node) => node.apply_state(member_state)?,
                Handle::List(list) => list.apply_state(member_state)?,
                Handle::Map(map) => map.apply_state(member_state)?,
            }
        }
        Ok(())
    }

    fn wire(&self, name: &Arc<str>, bus: &ChangeBus) -> Subscription {
        let parent = self.inner.changes.downgrade();
        let name = Arc::clone(name);
        bus.subscribe(move |change| {
            parent.emit(&change.clone().bubbled(Segment::Name(Arc::clone(&name))));
        })
    }

    fn member_handle_by_name(&self, name: &str) -> Result<Handle, TreeError> {
        let Some((index, _)) = self.inner.schema.member(name) else {
            return Err(self.no_member_err(name));
        };
        let members = self.inner.members.borrow();
        Ok(members[index].handle())
    }

    fn no_member_err(&self, name: &str) -> TreeError {
        TreeError::PathRoute {
            path: name.to_owned(),
            reason: format!("no declared member on {:?}", self.type_tag()),
        }
    }

    fn member_kind_err(&self, name: &str, wanted: &str) -> TreeError {
        TreeError::PathRoute {
            path: name.to_owned(),
            reason: format!("member is not {wanted}"),
        }
    }
}

impl Member {
    fn handle(&self) -> Handle {
        match self {
            Self::Cell(cell, _) => Handle::Cell(cell.clone()),
            Self::Node(node, _) => Handle::Node(node.clone()),
            Self::List(list, _) => Handle::List(list.clone()),
            Self::Map(map, _) => Handle::Map(map.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CellDecl, CellKind};

    fn vec2_schema() -> NodeSchema {
        NodeSchema::builder("Vec2Holder")
            .cell("pos", CellDecl::new(CellKind::Any, Value::Null))
            .build()
            .unwrap()
    }

    fn world_schema() -> NodeSchema {
        NodeSchema::builder("WorldState")
            .cell("counter", CellDecl::new(CellKind::I64, 0i64))
            .child("player", vec2_schema())
            .build()
            .unwrap()
    }

    #[test]
    fn bubbled_path_is_the_member_chain() {
        let world = NodeRef::new(&world_schema());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _sub = world.subscribe_changes(move |chg| sink.borrow_mut().push(chg.clone()));
        world
            .child("player")
            .unwrap()
            .cell("pos")
            .unwrap()
            .set(Value::map_of([("x", 1.0)]))
            .unwrap();
        let changes = seen.borrow();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path.to_string(), "player.pos");
    }

    #[test]
    fn root_observer_fires_before_the_mutating_call_returns() {
        let world = NodeRef::new(&world_schema());
        let fired = Rc::new(std::cell::Cell::new(false));
        let flag = Rc::clone(&fired);
        let _sub = world.subscribe_changes(move |_| flag.set(true));
        world.cell("counter").unwrap().set(1i64).unwrap();
        assert!(fired.get());
    }

    #[test]
    fn replacing_a_child_rewires_and_drops_the_old_subscription() {
        let world = NodeRef::new(&world_schema());
        let old_player = world.child("player").unwrap();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _sub = world.subscribe_changes(move |chg| sink.borrow_mut().push(chg.path.to_string()));

        let fresh = NodeRef::new(&vec2_schema());
        fresh.cell("pos").unwrap().set(Value::Bool(true)).unwrap();
        let replaced = world.set_child("player", fresh.clone()).unwrap();
        assert_eq!(replaced.type_tag(), old_player.type_tag());

        // Old child no longer bubbles; new child does.
        old_player.cell("pos").unwrap().set(Value::I64(1)).unwrap();
        fresh.cell("pos").unwrap().set(Value::I64(2)).unwrap();
        assert_eq!(&*seen.borrow(), &["player.pos".to_owned()]);
    }

    #[test]
    fn set_child_rejects_foreign_schemas() {
        let world = NodeRef::new(&world_schema());
        let wrong = NodeRef::new(&world_schema());
        assert!(matches!(
            world.set_child("player", wrong),
            Err(TreeError::SnapshotTypeMismatch { .. })
        ));
    }

    #[test]
    fn apply_patch_routes_to_a_nested_cell_silently() {
        let world = NodeRef::new(&world_schema());
        let outgoing = Rc::new(std::cell::Cell::new(0));
        let counter = Rc::clone(&outgoing);
        let _sub = world.subscribe_changes(move |_| counter.set(counter.get() + 1));
        let patched_paths = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&patched_paths);
        let _p = world.on_patched(move |path| sink.borrow_mut().push(path.to_string()));

        let path = Path::parse("player.pos").unwrap();
        world.apply_patch(&path, Some(&Value::I64(3))).unwrap();

        assert_eq!(
            world.child("player").unwrap().cell("pos").unwrap().get(),
            Value::I64(3)
        );
        assert_eq!(outgoing.get(), 0);
        assert_eq!(&*patched_paths.borrow(), &["player.pos".to_owned()]);
    }

    #[test]
    fn routing_failures_leave_no_signals_behind() {
        let world = NodeRef::new(&world_schema());
        let patched = Rc::new(std::cell::Cell::new(0));
        let counter = Rc::clone(&patched);
        let _p = world.on_patched(move |_| counter.set(counter.get() + 1));

        for literal in ["ghost", "counter.deeper", "player", "counter.[0]"] {
            let path = Path::parse(literal).unwrap();
            assert!(
                matches!(
                    world.apply_patch(&path, Some(&Value::I64(1))),
                    Err(TreeError::PathRoute { .. })
                ),
                "expected a routing failure for {literal:?}"
            );
        }
        assert_eq!(patched.get(), 0);
    }

    #[test]
    fn snapshot_round_trips_and_is_idempotent() {
        let source = NodeRef::new(&world_schema());
        source.cell("counter").unwrap().set(42i64).unwrap();
        source
            .child("player")
            .unwrap()
            .cell("pos")
            .unwrap()
            .set(Value::map_of([("x", 9.0)]))
            .unwrap();

        let replica = NodeRef::new(&world_schema());
        let applied = Rc::new(std::cell::Cell::new(0));
        let counter = Rc::clone(&applied);
        let _s = replica.on_snapshot_applied(move |_: &()| counter.set(counter.get() + 1));

        replica.apply_snapshot("WorldState", &source.state()).unwrap();
        assert_eq!(replica.state(), source.state());
        replica.apply_snapshot("WorldState", &source.state()).unwrap();
        assert_eq!(replica.state(), source.state());
        assert_eq!(applied.get(), 2);
    }

    #[test]
    fn snapshot_type_tag_is_checked() {
        let replica = NodeRef::new(&world_schema());
        let err = replica
            .apply_snapshot("OtherThing", &replica.state())
            .unwrap_err();
        assert!(matches!(err, TreeError::SnapshotTypeMismatch { .. }));
    }
}
