// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Tracked scalar cells: one logical mutable slot each.
//!
//! A cell distinguishes two write paths. [`CellRef::set`] is the local path:
//! it emits a [`FieldChange`] on the outgoing stream (when tracking is on).
//! [`CellRef::apply_patch`] is the remote path: it stores silently and emits
//! only local `patched`/`value_changed` notifications. Echo suppression rests
//! entirely on this split; nothing downstream has to filter.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::change::{ChangeBus, FieldChange, Signal, Subscription};
use crate::error::TreeError;
use crate::path::Path;
use crate::schema::{CellDecl, CellKind, Comparator};
use crate::value::{Scalar, Value};

struct CellInner {
    kind: CellKind,
    track_outgoing: bool,
    accept_incoming: bool,
    comparator: Option<Comparator>,
    value: RefCell<Value>,
    changes: ChangeBus,
    value_changed: Signal<Value>,
    patched: Signal<Value>,
}

/// Handle to one tracked mutable slot. Clones share the slot.
///
/// The value is always defined: construction seeds it with the declared
/// default.
#[derive(Clone)]
pub struct CellRef {
    inner: Rc<CellInner>,
}

impl fmt::Debug for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellRef")
            .field("kind", &self.inner.kind)
            .field("value", &*self.inner.value.borrow())
            .finish()
    }
}

impl CellRef {
    pub(crate) fn from_decl(decl: &CellDecl) -> Self {
        Self {
            inner: Rc::new(CellInner {
                kind: decl.kind,
                track_outgoing: decl.track_outgoing,
                accept_incoming: decl.accept_incoming,
                comparator: decl.comparator.clone(),
                // The default was coerced when the schema was built.
                value: RefCell::new(decl.default.clone()),
                changes: ChangeBus::new(),
                value_changed: Signal::new(),
                patched: Signal::new(),
            }),
        }
    }

    /// Declared value kind.
    #[must_use]
    pub fn kind(&self) -> CellKind {
        self.inner.kind
    }

    /// Current value.
    #[must_use]
    pub fn get(&self) -> Value {
        self.inner.value.borrow().clone()
    }

    /// Current value, extracted as `T`.
    pub fn get_as<T: Scalar>(&self) -> Result<T, TreeError> {
        T::from_value(&self.inner.value.borrow())
    }

    /// Local write. No-op when the comparator deems `value` equal to the
    /// current one; otherwise stores and emits one [`FieldChange`] with the
    /// empty path (when tracking is on) plus a `value_changed` notification.
    pub fn set(&self, value: impl Into<Value>) -> Result<(), TreeError> {
        let value = self.inner.kind.coerce(value.into())?;
        let old = self.inner.value.borrow().clone();
        if self.equal(&old, &value) {
            return Ok(());
        }
        *self.inner.value.borrow_mut() = value.clone();
        if self.inner.track_outgoing {
            self.inner.changes.emit(&FieldChange {
                path: Path::root(),
                old: Some(old),
                new: Some(value.clone()),
            });
        }
        self.inner.value_changed.emit(&value);
        Ok(())
    }

    /// Remote write. No-op when incoming patches are ignored or the value is
    /// equal; otherwise stores and emits `patched` and `value_changed`,
    /// never a [`FieldChange`].
    pub fn apply_patch(&self, value: Value) -> Result<(), TreeError> {
        if !self.inner.accept_incoming {
            return Ok(());
        }
        let value = self.inner.kind.coerce(value)?;
        let current = self.inner.value.borrow().clone();
        if self.equal(&current, &value) {
            return Ok(());
        }
        *self.inner.value.borrow_mut() = value.clone();
        self.inner.patched.emit(&value);
        self.inner.value_changed.emit(&value);
        Ok(())
    }

    /// Subscribes to the outgoing change stream.
    pub fn subscribe_changes(&self, handler: impl Fn(&FieldChange) + 'static) -> Subscription {
        self.inner.changes.subscribe(handler)
    }

    /// Subscribes to every stored value, local or remote.
    pub fn on_value_changed(&self, handler: impl Fn(&Value) + 'static) -> Subscription {
        self.inner.value_changed.subscribe(handler)
    }

    /// Subscribes to remotely-patched values only.
    pub fn on_patched(&self, handler: impl Fn(&Value) + 'static) -> Subscription {
        self.inner.patched.subscribe(handler)
    }

    pub(crate) fn changes(&self) -> &ChangeBus {
        &self.inner.changes
    }

    fn equal(&self, a: &Value, b: &Value) -> bool {
        match &self.inner.comparator {
            Some(eq) => eq(a, b),
            None => a == b,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell as StdCell;

    fn cell(decl: CellDecl) -> CellRef {
        CellRef::from_decl(&decl)
    }

    #[test]
    fn set_emits_one_change_with_old_and_new() {
        let c = cell(CellDecl::new(CellKind::I64, 0i64));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let _sub = c.subscribe_changes(move |chg| sink.borrow_mut().push(chg.clone()));
        c.set(5i64).unwrap();
        let changes = seen.borrow();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].path.is_empty());
        assert_eq!(changes[0].old, Some(Value::I64(0)));
        assert_eq!(changes[0].new, Some(Value::I64(5)));
    }

    #[test]
    fn equal_set_is_a_no_op() {
        let c = cell(CellDecl::new(CellKind::I64, 5i64));
        let hits = Rc::new(StdCell::new(0));
        let counter = Rc::clone(&hits);
        let _sub = c.subscribe_changes(move |_| counter.set(counter.get() + 1));
        c.set(5i64).unwrap();
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn apply_patch_is_silent_on_the_outgoing_stream() {
        let c = cell(CellDecl::new(CellKind::I64, 0i64));
        let outgoing = Rc::new(StdCell::new(0));
        let patched = Rc::new(StdCell::new(0));
        let (o, p) = (Rc::clone(&outgoing), Rc::clone(&patched));
        let _s1 = c.subscribe_changes(move |_| o.set(o.get() + 1));
        let _s2 = c.on_patched(move |_| p.set(p.get() + 1));
        c.apply_patch(Value::I64(9)).unwrap();
        assert_eq!(c.get(), Value::I64(9));
        assert_eq!(outgoing.get(), 0);
        assert_eq!(patched.get(), 1);
    }

    #[test]
    fn untracked_cells_change_without_emitting() {
        let c = cell(CellDecl::new(CellKind::I64, 0i64).untracked());
        let outgoing = Rc::new(StdCell::new(0));
        let local = Rc::new(StdCell::new(0));
        let (o, l) = (Rc::clone(&outgoing), Rc::clone(&local));
        let _s1 = c.subscribe_changes(move |_| o.set(o.get() + 1));
        let _s2 = c.on_value_changed(move |_| l.set(l.get() + 1));
        c.set(3i64).unwrap();
        assert_eq!(outgoing.get(), 0);
        assert_eq!(local.get(), 1);
    }

    #[test]
    fn incoming_can_be_ignored() {
        let c = cell(CellDecl::new(CellKind::I64, 1i64).ignore_incoming());
        c.apply_patch(Value::I64(9)).unwrap();
        assert_eq!(c.get(), Value::I64(1));
    }

    #[test]
    fn type_mismatch_leaves_the_cell_untouched() {
        let c = cell(CellDecl::new(CellKind::I64, 1i64));
        let err = c.apply_patch(Value::Str("no".into())).unwrap_err();
        assert!(matches!(err, TreeError::TypeMismatch { .. }));
        assert_eq!(c.get(), Value::I64(1));
    }

    #[test]
    fn epsilon_cells_swallow_jitter() {
        let c = cell(CellDecl::new(CellKind::F64, 1.0).with_epsilon(1e-6));
        let hits = Rc::new(StdCell::new(0));
        let counter = Rc::clone(&hits);
        let _sub = c.subscribe_changes(move |_| counter.set(counter.get() + 1));
        c.set(1.0 + 1e-9).unwrap();
        assert_eq!(hits.get(), 0);
        c.set(2.0).unwrap();
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn f64_cells_accept_integer_patches() {
        let c = cell(CellDecl::new(CellKind::F64, 0.0));
        c.apply_patch(Value::I64(4)).unwrap();
        assert_eq!(c.get(), Value::F64(4.0));
    }
}
