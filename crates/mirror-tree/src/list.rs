// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Ordered tracked collections with deterministic index semantics.
//!
//! Every nested-node element carries a bubble subscription tagged with its
//! current index. The tag is a shared slot the bubble closure reads at
//! emission time; structural operations re-tag by scanning the affected
//! range, so tags are never cached off-index. Invariant: after any
//! operation, the subscription tag of the element at position `i` is `i`.

use std::cell::{Cell as StdCell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::change::{ChangeBus, FieldChange, Signal, Subscription};
use crate::error::TreeError;
use crate::node::NodeRef;
use crate::path::{is_reserved_op, Path, Segment};
use crate::schema::ElementDecl;
use crate::value::Value;

/// One collection element: a bare scalar (unwired) or a nested tracked node
/// (wired).
pub(crate) enum Item {
    Scalar(Value),
    Node(NodeRef),
}

impl Item {
    pub(crate) fn state(&self) -> Value {
        match self {
            Self::Scalar(v) => v.clone(),
            Self::Node(n) => n.state(),
        }
    }
}

struct Entry {
    item: Item,
    tag: Rc<StdCell<u32>>,
    _sub: Option<Subscription>,
}

struct ListInner {
    element: ElementDecl,
    changes: ChangeBus,
    patched: Signal<Path>,
    entries: RefCell<Vec<Entry>>,
}

/// Handle to an ordered, dense, 0-indexed tracked collection.
/// Clones share the list.
#[derive(Clone)]
pub struct ListRef {
    inner: Rc<ListInner>,
}

impl fmt::Debug for ListRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListRef")
            .field("len", &self.len())
            .finish()
    }
}

impl ListRef {
    pub(crate) fn new(element: &ElementDecl) -> Self {
        Self {
            inner: Rc::new(ListInner {
                element: element.clone(),
                changes: ChangeBus::new(),
                patched: Signal::new(),
                entries: RefCell::new(Vec::new()),
            }),
        }
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    /// `true` when the list holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.borrow().is_empty()
    }

    /// State of the element at `index`.
    pub fn get(&self, index: usize) -> Result<Value, TreeError> {
        let entries = self.inner.entries.borrow();
        entries
            .get(index)
            .map(|e| e.item.state())
            .ok_or_else(|| oob(index))
    }

    /// Nested-node handle at `index`. Fails on scalar-element lists.
    pub fn node_at(&self, index: usize) -> Result<NodeRef, TreeError> {
        let entries = self.inner.entries.borrow();
        let entry = entries.get(index).ok_or_else(|| oob(index))?;
        match &entry.item {
            Item::Node(node) => Ok(node.clone()),
            Item::Scalar(_) => Err(TreeError::PathRoute {
                path: format!("[{index}]"),
                reason: "element is a scalar, not a node".to_owned(),
            }),
        }
    }

    /// Appends `item`. Emits one change with the `add` opcode path.
    pub fn add(&self, item: impl Into<Value>) -> Result<(), TreeError> {
        let state = item.into();
        let _ = self.push_inner(&state, true)?;
        Ok(())
    }

    /// Inserts `item` at `index` (`0 ≤ index ≤ len`), shifting the tail right
    /// and re-tagging its subscriptions.
    pub fn insert(&self, index: usize, item: impl Into<Value>) -> Result<(), TreeError> {
        let state = item.into();
        self.insert_inner(index, &state, true)
    }

    /// Removes the element at `index`, shifting the tail left and re-tagging.
    /// Returns the removed element's state.
    pub fn remove_at(&self, index: usize) -> Result<Value, TreeError> {
        self.remove_inner(index, true)
    }

    /// Replaces the element at `index`, unwiring the old element and wiring
    /// the new one under the same tag. Returns the old element's state.
    pub fn replace(&self, index: usize, item: impl Into<Value>) -> Result<Value, TreeError> {
        let state = item.into();
        self.replace_inner(index, &state, true)
    }

    /// Moves the element at `from` to position `to` (`from ≠ to`), re-tagging
    /// the affected interval. Observers see exactly one event, not a
    /// remove+insert pair.
    pub fn move_item(&self, from: usize, to: usize) -> Result<(), TreeError> {
        self.move_inner(from, to, true)
    }

    /// Removes every element, unwiring all subscriptions. No-op when empty.
    pub fn clear(&self) {
        self.clear_inner(true);
    }

    /// Subscribes to the outgoing change stream of this list and its nested
    /// elements.
    pub fn subscribe_changes(&self, handler: impl Fn(&FieldChange) + 'static) -> Subscription {
        self.inner.changes.subscribe(handler)
    }

    /// Subscribes to the local "a remote patch landed here" notification.
    /// The payload is the op path relative to this list.
    pub fn on_patched(&self, handler: impl Fn(&Path) + 'static) -> Subscription {
        self.inner.patched.subscribe(handler)
    }

    /// Full list state, element states in order.
    #[must_use]
    pub fn state(&self) -> Value {
        let entries = self.inner.entries.borrow();
        Value::List(entries.iter().map(|e| e.item.state()).collect())
    }

    pub(crate) fn changes_bus(&self) -> &ChangeBus {
        &self.inner.changes
    }

    // ── Silent (receive-side) routing ───────────────────────────────

    pub(crate) fn route_apply(
        &self,
        path: &Path,
        at: usize,
        value: Option<&Value>,
    ) -> Result<(), TreeError> {
        let Some(segment) = path.segment(at) else {
            return Err(TreeError::route(path, "a patch cannot target a list"));
        };
        match segment {
            Segment::Index(i) => {
                let index = *i as usize;
                if path.len() == at + 1 {
                    let Some(v) = value else {
                        return Err(TreeError::route(path, "missing value for an element patch"));
                    };
                    if self.silent_set_element(index, v, path)? {
                        self.inner.patched.emit(&Segment::Index(*i).into());
                    }
                    Ok(())
                } else {
                    let node = {
                        let entries = self.inner.entries.borrow();
                        let entry = entries
                            .get(index)
                            .ok_or_else(|| TreeError::route(path, "index out of range"))?;
                        match &entry.item {
                            Item::Node(node) => node.clone(),
                            Item::Scalar(_) => {
                                return Err(TreeError::route(
                                    path,
                                    "path continues past a scalar element",
                                ))
                            }
                        }
                    };
                    node.route_apply(path, at + 1, value)
                }
            }
            Segment::Name(op) if is_reserved_op(op) => {
                if path.len() != at + 1 {
                    return Err(TreeError::route(path, "an opcode must terminate the path"));
                }
                let local = Segment::name(op).into();
                self.apply_op(op, value, path)?;
                self.inner.patched.emit(&local);
                Ok(())
            }
            Segment::Name(_) | Segment::Key(_) => Err(TreeError::route(
                path,
                "expected an index or opcode at a list",
            )),
        }
    }

    pub(crate) fn apply_state(&self, state: &Value) -> Result<(), TreeError> {
        let Value::List(target) = state else {
            return Err(TreeError::TypeMismatch {
                expected: "list",
                actual: state.kind().name(),
            });
        };
        // Shrink first so the prefix walk below covers every survivor.
        {
            let mut entries = self.inner.entries.borrow_mut();
            entries.truncate(target.len());
        }
        // Reconcile the common prefix in place: nested nodes keep their
        // wiring, scalars overwrite.
        let prefix = self.len();
        for (index, element_state) in target.iter().enumerate().take(prefix) {
            match &self.inner.element {
                ElementDecl::Scalar(kind) => {
                    let coerced = kind.coerce(element_state.clone())?;
                    let mut entries = self.inner.entries.borrow_mut();
                    entries[index].item = Item::Scalar(coerced);
                }
                ElementDecl::Node(_) => {
                    let node = self.node_at(index)?;
                    node.apply_state(element_state)?;
                }
            }
        }
        // Grow with freshly-built entries.
        for element_state in target.iter().skip(prefix) {
            let entry = self.build_entry(element_state)?;
            self.inner.entries.borrow_mut().push(entry);
        }
        let entries = self.inner.entries.borrow();
        retag(&entries, 0);
        Ok(())
    }

    // ── Shared structural edits ─────────────────────────────────────

    fn push_inner(&self, state: &Value, emit: bool) -> Result<Value, TreeError> {
        let entry = self.build_entry(state)?;
        let stored = entry.item.state();
        {
            let mut entries = self.inner.entries.borrow_mut();
            entries.push(entry);
            let index = entries.len() - 1;
            entries[index].tag.set(index as u32);
        }
        if emit {
            self.inner.changes.emit(&FieldChange {
                path: Segment::name("add").into(),
                old: None,
                new: Some(stored.clone()),
            });
        }
        Ok(stored)
    }

    fn insert_inner(&self, index: usize, state: &Value, emit: bool) -> Result<(), TreeError> {
        if index > self.len() {
            return Err(oob(index));
        }
        let entry = self.build_entry(state)?;
        let stored = entry.item.state();
        {
            let mut entries = self.inner.entries.borrow_mut();
            entries.insert(index, entry);
            retag(&entries, index);
        }
        if emit {
            self.inner.changes.emit(&FieldChange {
                path: Segment::Index(index as u32).into(),
                old: None,
                new: Some(stored),
            });
        }
        Ok(())
    }

    fn remove_inner(&self, index: usize, emit: bool) -> Result<Value, TreeError> {
        let removed = {
            let mut entries = self.inner.entries.borrow_mut();
            if index >= entries.len() {
                return Err(oob(index));
            }
            let removed = entries.remove(index);
            retag(&entries, index);
            removed
        };
        let old = removed.item.state();
        if emit {
            self.inner.changes.emit(&FieldChange {
                path: Segment::Index(index as u32).into(),
                old: Some(old.clone()),
                new: None,
            });
        }
        Ok(old)
    }

    fn replace_inner(&self, index: usize, state: &Value, emit: bool) -> Result<Value, TreeError> {
        if index >= self.len() {
            return Err(oob(index));
        }
        let entry = self.build_entry(state)?;
        entry.tag.set(index as u32);
        let stored = entry.item.state();
        let old_entry = {
            let mut entries = self.inner.entries.borrow_mut();
            std::mem::replace(&mut entries[index], entry)
        };
        let old = old_entry.item.state();
        if emit {
            self.inner.changes.emit(&FieldChange {
                path: Segment::Index(index as u32).into(),
                old: Some(old.clone()),
                new: Some(stored),
            });
        }
        Ok(old)
    }

    fn move_inner(&self, from: usize, to: usize, emit: bool) -> Result<(), TreeError> {
        {
            let mut entries = self.inner.entries.borrow_mut();
            if from >= entries.len() {
                return Err(oob(from));
            }
            if to >= entries.len() {
                return Err(oob(to));
            }
            if from == to {
                return Err(TreeError::PathRoute {
                    path: format!("[{from}]"),
                    reason: "move requires from ≠ to".to_owned(),
                });
            }
            let entry = entries.remove(from);
            entries.insert(to, entry);
            retag(&entries, from.min(to));
        }
        if emit {
            self.inner.changes.emit(&FieldChange {
                path: Segment::name("move").into(),
                old: Some(Value::I64(from as i64)),
                new: Some(Value::I64(to as i64)),
            });
        }
        Ok(())
    }

    fn clear_inner(&self, emit: bool) {
        let prev_len = {
            let mut entries = self.inner.entries.borrow_mut();
            let prev_len = entries.len();
            entries.clear();
            prev_len
        };
        if prev_len == 0 {
            return;
        }
        if emit {
            self.inner.changes.emit(&FieldChange {
                path: Segment::name("clear").into(),
                old: Some(Value::I64(prev_len as i64)),
                new: Some(Value::I64(0)),
            });
        }
    }

    /// Terminal `[i]` patch: overwrite the element state in place.
    /// Returns whether anything changed.
    fn silent_set_element(
        &self,
        index: usize,
        state: &Value,
        path: &Path,
    ) -> Result<bool, TreeError> {
        if index >= self.len() {
            return Err(TreeError::route(path, "index out of range"));
        }
        match &self.inner.element {
            ElementDecl::Scalar(kind) => {
                let coerced = kind.coerce(state.clone())?;
                let mut entries = self.inner.entries.borrow_mut();
                if let Item::Scalar(current) = &entries[index].item {
                    if *current == coerced {
                        return Ok(false);
                    }
                }
                entries[index].item = Item::Scalar(coerced);
                Ok(true)
            }
            ElementDecl::Node(_) => {
                let node = self.node_at(index).map_err(|e| contextualize(e, path))?;
                node.apply_state(state)?;
                Ok(true)
            }
        }
    }

    fn apply_op(&self, op: &str, value: Option<&Value>, path: &Path) -> Result<(), TreeError> {
        match op {
            "add" => {
                let Some(item) = value else {
                    return Err(TreeError::route(path, "add needs an item payload"));
                };
                let _ = self.push_inner(item, false)?;
                Ok(())
            }
            "insert" => {
                let index = arg_index(value, "index", path)?;
                let item = arg_item(value, path)?;
                self.insert_inner(index, item, false)
                    .map_err(|e| contextualize(e, path))
            }
            "remove" => {
                let index = arg_index(value, "index", path)?;
                let _ = self
                    .remove_inner(index, false)
                    .map_err(|e| contextualize(e, path))?;
                Ok(())
            }
            "replace" => {
                let index = arg_index(value, "index", path)?;
                let item = arg_item(value, path)?;
                let _ = self
                    .replace_inner(index, item, false)
                    .map_err(|e| contextualize(e, path))?;
                Ok(())
            }
            "move" => {
                let from = arg_index(value, "from", path)?;
                let to = arg_index(value, "to", path)?;
                self.move_inner(from, to, false)
                    .map_err(|e| contextualize(e, path))
            }
            "clear" => {
                self.clear_inner(false);
                Ok(())
            }
            _ => Err(TreeError::route(path, "unsupported list opcode")),
        }
    }

    fn build_entry(&self, state: &Value) -> Result<Entry, TreeError> {
        match &self.inner.element {
            ElementDecl::Scalar(kind) => Ok(Entry {
                item: Item::Scalar(kind.coerce(state.clone())?),
                tag: Rc::new(StdCell::new(0)),
                _sub: None,
            }),
            ElementDecl::Node(schema) => {
                let node = NodeRef::new(schema);
                node.apply_state(state)?;
                let tag = Rc::new(StdCell::new(0));
                let sub = self.wire(&node, &tag);
                Ok(Entry {
                    item: Item::Node(node),
                    tag,
                    _sub: Some(sub),
                })
            }
        }
    }

    fn wire(&self, node: &NodeRef, tag: &Rc<StdCell<u32>>) -> Subscription {
        let bus = self.inner.changes.downgrade();
        let tag = Rc::clone(tag);
        node.subscribe_changes(move |change| {
            bus.emit(&change.clone().bubbled(Segment::Index(tag.get())));
        })
    }
}

fn retag(entries: &[Entry], from: usize) {
    for (index, entry) in entries.iter().enumerate().skip(from) {
        entry.tag.set(index as u32);
    }
}

fn oob(index: usize) -> TreeError {
    TreeError::PathRoute {
        path: format!("[{index}]"),
        reason: "index out of range".to_owned(),
    }
}

/// Replaces a local-index error with one carrying the full inbound path.
fn contextualize(err: TreeError, path: &Path) -> TreeError {
    match err {
        TreeError::PathRoute { reason, .. } => TreeError::route(path, reason),
        other => other,
    }
}

fn arg_index(value: Option<&Value>, key: &str, path: &Path) -> Result<usize, TreeError> {
    value
        .and_then(|v| v.get(key))
        .and_then(Value::as_i64)
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| TreeError::route(path, format!("op payload needs an integer {key:?}")))
}

fn arg_item<'a>(value: Option<&'a Value>, path: &Path) -> Result<&'a Value, TreeError> {
    value
        .and_then(|v| v.get("item"))
        .ok_or_else(|| TreeError::route(path, "op payload needs an \"item\""))
}
