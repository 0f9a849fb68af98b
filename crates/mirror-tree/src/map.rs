// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Keyed tracked collections.
//!
//! Keys are unique and carry no ordering guarantee; nested-node values are
//! wired with a bubble subscription that prepends the `["key"]` segment.
//! Keys never shift, so there is nothing to re-tag. On the wire, an upsert is
//! a plain `["key"]`-terminal patch and a removal is the same path with no
//! value; only `clear` uses an opcode.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::change::{ChangeBus, FieldChange, Signal, Subscription};
use crate::error::TreeError;
use crate::list::Item;
use crate::node::NodeRef;
use crate::path::{Path, Segment};
use crate::schema::ElementDecl;
use crate::value::Value;

struct Entry {
    item: Item,
    _sub: Option<Subscription>,
}

struct MapInner {
    element: ElementDecl,
    changes: ChangeBus,
    patched: Signal<Path>,
    entries: RefCell<FxHashMap<String, Entry>>,
}

/// Handle to a keyed tracked collection. Clones share the map.
#[derive(Clone)]
pub struct MapRef {
    inner: Rc<MapInner>,
}

impl fmt::Debug for MapRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MapRef").field("len", &self.len()).finish()
    }
}

impl MapRef {
    pub(crate) fn new(element: &ElementDecl) -> Self {
        Self {
            inner: Rc::new(MapInner {
                element: element.clone(),
                changes: ChangeBus::new(),
                patched: Signal::new(),
                entries: RefCell::new(FxHashMap::default()),
            }),
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    /// `true` when the map holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.borrow().is_empty()
    }

    /// `true` when `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.entries.borrow().contains_key(key)
    }

    /// State of the entry under `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.entries.borrow().get(key).map(|e| e.item.state())
    }

    /// Nested-node handle under `key`. Fails on scalar-value maps and
    /// missing keys.
    pub fn node(&self, key: &str) -> Result<NodeRef, TreeError> {
        let entries = self.inner.entries.borrow();
        let entry = entries.get(key).ok_or_else(|| key_err(key, "unknown key"))?;
        match &entry.item {
            Item::Node(node) => Ok(node.clone()),
            Item::Scalar(_) => Err(key_err(key, "entry is a scalar, not a node")),
        }
    }

    /// Keys currently present, in no particular order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.entries.borrow().keys().cloned().collect()
    }

    /// Upserts `item` under `key`, unwiring any previous entry. Emits one
    /// change with `old` absent when the key was new.
    pub fn set(&self, key: &str, item: impl Into<Value>) -> Result<(), TreeError> {
        let state = item.into();
        let _ = self.set_inner(key, &state, true)?;
        Ok(())
    }

    /// Removes the entry under `key`, unwiring it. Removing an absent key is
    /// idempotent: no event, no error. Returns the removed state, if any.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.remove_inner(key, true)
    }

    /// Removes every entry, unwiring all subscriptions. No-op when empty.
    pub fn clear(&self) {
        self.clear_inner(true);
    }

    /// Subscribes to the outgoing change stream of this map and its nested
    /// values.
    pub fn subscribe_changes(&self, handler: impl Fn(&FieldChange) + 'static) -> Subscription {
        self.inner.changes.subscribe(handler)
    }

    /// Subscribes to the local "a remote patch landed here" notification.
    /// The payload is the op path relative to this map.
    pub fn on_patched(&self, handler: impl Fn(&Path) + 'static) -> Subscription {
        self.inner.patched.subscribe(handler)
    }

    /// Full map state. Sorted by key so the encoding is deterministic.
    #[must_use]
    pub fn state(&self) -> Value {
        let entries = self.inner.entries.borrow();
        let out: BTreeMap<String, Value> = entries
            .iter()
            .map(|(k, e)| (k.clone(), e.item.state()))
            .collect();
        Value::Map(out)
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
            return Err(TreeError::route(path, "a patch cannot target a map"));
        };
        match segment {
            Segment::Key(key) => {
                let key = Arc::clone(key);
                if path.len() == at + 1 {
                    let changed = match value {
                        Some(v) => self
                            .set_inner(&key, v, false)
                            .map_err(|e| contextualize(e, path))?,
                        None => self.remove_inner(&key, false).is_some(),
                    };
                    if changed {
                        self.inner.patched.emit(&Segment::Key(key).into());
                    }
                    Ok(())
                } else {
                    let node = {
                        let entries = self.inner.entries.borrow();
                        let entry = entries
                            .get(key.as_ref())
                            .ok_or_else(|| TreeError::route(path, "unknown map key"))?;
                        match &entry.item {
                            Item::Node(node) => node.clone(),
                            Item::Scalar(_) => {
                                return Err(TreeError::route(
                                    path,
                                    "path continues past a scalar entry",
                                ))
                            }
                        }
                    };
                    node.route_apply(path, at + 1, value)
                }
            }
            Segment::Name(op) if op.as_ref() == "clear" => {
                if path.len() != at + 1 {
                    return Err(TreeError::route(path, "an opcode must terminate the path"));
                }
                self.clear_inner(false);
                self.inner.patched.emit(&Segment::name("clear").into());
                Ok(())
            }
            Segment::Name(_) | Segment::Index(_) => Err(TreeError::route(
                path,
                "expected a quoted key or clear at a map",
            )),
        }
    }

    pub(crate) fn apply_state(&self, state: &Value) -> Result<(), TreeError> {
        let Value::Map(target) = state else {
            return Err(TreeError::TypeMismatch {
                expected: "map",
                actual: state.kind().name(),
            });
        };
        // Upsert everything the source has; nested nodes reconcile in place.
        for (key, entry_state) in target {
            let present_node = {
                let entries = self.inner.entries.borrow();
                match entries.get(key).map(|e| &e.item) {
                    Some(Item::Node(node)) => Some(node.clone()),
                    _ => None,
                }
            };
            match present_node {
                Some(node) => node.apply_state(entry_state)?,
                None => {
                    let _ = self.set_inner(key, entry_state, false)?;
                }
            }
        }
        // Drop everything the source lacks.
        let stale: Vec<String> = {
            let entries = self.inner.entries.borrow();
            entries
                .keys()
                .filter(|k| !target.contains_key(*k))
                .cloned()
                .collect()
        };
        for key in stale {
            let _ = self.remove_inner(&key, false);
        }
        Ok(())
    }

    // ── Shared structural edits ─────────────────────────────────────

    /// Upsert. Returns whether the stored value actually changed; an equal
    /// upsert keeps the existing entry and its wiring.
    fn set_inner(&self, key: &str, state: &Value, emit: bool) -> Result<bool, TreeError> {
        if key.contains('"') {
            return Err(key_err(key, "keys must not contain '\"'"));
        }
        let old = self.get(key);
        let entry = self.build_entry(key, state)?;
        let stored = entry.item.state();
        if old.as_ref() == Some(&stored) {
            return Ok(false);
        }
        let _ = self.inner.entries.borrow_mut().insert(key.to_owned(), entry);
        if emit {
            self.inner.changes.emit(&FieldChange {
                path: Segment::key(key).into(),
                old,
                new: Some(stored),
            });
        }
        Ok(true)
    }

    fn remove_inner(&self, key: &str, emit: bool) -> Option<Value> {
        let removed = self.inner.entries.borrow_mut().remove(key)?;
        let old = removed.item.state();
        if emit {
            self.inner.changes.emit(&FieldChange {
                path: Segment::key(key).into(),
                old: Some(old.clone()),
                new: None,
            });
        }
        Some(old)
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

    fn build_entry(&self, key: &str, state: &Value) -> Result<Entry, TreeError> {
        match &self.inner.element {
            ElementDecl::Scalar(kind) => Ok(Entry {
                item: Item::Scalar(kind.coerce(state.clone())?),
                _sub: None,
            }),
            ElementDecl::Node(schema) => {
                let node = NodeRef::new(schema);
                node.apply_state(state)?;
                let sub = self.wire(&node, key);
                Ok(Entry {
                    item: Item::Node(node),
                    _sub: Some(sub),
                })
            }
        }
    }

    fn wire(&self, node: &NodeRef, key: &str) -> Subscription {
        let bus = self.inner.changes.downgrade();
        let key: Arc<str> = Arc::from(key);
        node.subscribe_changes(move |change| {
            bus.emit(&change.clone().bubbled(Segment::Key(Arc::clone(&key))));
        })
    }
}

fn key_err(key: &str, reason: &str) -> TreeError {
    TreeError::PathRoute {
        path: format!("[{key:?}]"),
        reason: reason.to_owned(),
    }
}

/// Replaces a local-key error with one carrying the full inbound path.
fn contextualize(err: TreeError, path: &Path) -> TreeError {
    match err {
        TreeError::PathRoute { reason, .. } => TreeError::route(path, reason),
        other => other,
    }
}
