// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Change records and subscription plumbing.
//!
//! The tree is single-threaded: signals are `Rc`-shared and handlers run
//! synchronously on the model thread, so a root observer sees a bubbled
//! change before the mutating call returns. Emission iterates a snapshot of
//! the subscriber list, which makes re-entrant subscribe/unsubscribe from
//! inside a handler safe; a handler removed mid-emission still receives the
//! event that was already in flight.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use crate::path::{Path, Segment};
use crate::value::Value;

/// A local-origin change record, bubbled from a leaf toward the root and
/// forwarded to the transport as a patch.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    /// Location of the change, relative to the emitting element.
    pub path: Path,
    /// Previous value. Absent for structural additions.
    pub old: Option<Value>,
    /// New value. Absent for removals.
    pub new: Option<Value>,
}

impl FieldChange {
    /// Returns the change with `segment` prepended (one bubbling hop).
    #[must_use]
    pub fn bubbled(mut self, segment: Segment) -> Self {
        self.path.prepend(segment);
        self
    }
}

type Handler<T> = Rc<dyn Fn(&T)>;

struct SignalInner<T> {
    next_id: u64,
    handlers: Vec<(u64, Handler<T>)>,
}

impl<T> Default for SignalInner<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            handlers: Vec::new(),
        }
    }
}

/// A synchronous broadcast channel for one event type.
///
/// Clones share the subscriber list. Handlers run in registration order.
pub struct Signal<T> {
    inner: Rc<RefCell<SignalInner<T>>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Default for Signal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("handlers", &self.inner.borrow().handlers.len())
            .finish()
    }
}

impl<T: 'static> Signal<T> {
    /// Creates a signal with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(SignalInner::default())),
        }
    }

    /// Registers `handler`, returning a guard that unsubscribes on drop.
    pub fn subscribe(&self, handler: impl Fn(&T) + 'static) -> Subscription {
        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.handlers.push((id, Rc::new(handler)));
            id
        };
        let weak = Rc::downgrade(&self.inner);
        Subscription::new(move || {
            if let Some(cell) = weak.upgrade() {
                cell.borrow_mut().handlers.retain(|(hid, _)| *hid != id);
            }
        })
    }

    /// Delivers `event` to every current subscriber.
    pub fn emit(&self, event: &T) {
        // Snapshot first: handlers may subscribe or unsubscribe re-entrantly.
        let handlers: Vec<Handler<T>> = self
            .inner
            .borrow()
            .handlers
            .iter()
            .map(|(_, h)| Rc::clone(h))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().handlers.len()
    }

    /// Returns a weak handle for bubbling closures, so a detached child
    /// stops emitting instead of keeping its old parent alive.
    pub(crate) fn downgrade(&self) -> WeakSignal<T> {
        WeakSignal {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

/// Weak counterpart of [`Signal`], held by child-to-parent bubble closures.
pub(crate) struct WeakSignal<T> {
    inner: Weak<RefCell<SignalInner<T>>>,
}

impl<T> Clone for WeakSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T: 'static> WeakSignal<T> {
    /// Emits `event` if the signal is still alive. Events emitted after the
    /// owner was dropped are discarded.
    pub(crate) fn emit(&self, event: &T) {
        if let Some(inner) = self.inner.upgrade() {
            Signal { inner }.emit(event);
        }
    }
}

/// The outgoing change stream of a tracked element.
pub type ChangeBus = Signal<FieldChange>;

type Cancel = Box<dyn FnOnce()>;

/// RAII subscription guard. Dropping it unsubscribes the handler.
#[must_use = "dropping a Subscription immediately unsubscribes its handler"]
pub struct Subscription {
    cancel: Option<Cancel>,
}

impl Subscription {
    fn new(cancel: impl FnOnce() + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.cancel.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn emit_reaches_subscribers_in_order() {
        let signal: Signal<i64> = Signal::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (a, b) = (Rc::clone(&seen), Rc::clone(&seen));
        let _s1 = signal.subscribe(move |n| a.borrow_mut().push(("first", *n)));
        let _s2 = signal.subscribe(move |n| b.borrow_mut().push(("second", *n)));
        signal.emit(&7);
        assert_eq!(&*seen.borrow(), &[("first", 7), ("second", 7)]);
    }

    #[test]
    fn dropping_the_guard_unsubscribes() {
        let signal: Signal<()> = Signal::new();
        let hits = Rc::new(Cell::new(0));
        let counter = Rc::clone(&hits);
        let sub = signal.subscribe(move |_: &()| counter.set(counter.get() + 1));
        signal.emit(&());
        drop(sub);
        signal.emit(&());
        assert_eq!(hits.get(), 1);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn reentrant_unsubscribe_during_emit_is_safe() {
        let signal: Signal<()> = Signal::new();
        let slot: Rc<RefCell<Option<Subscription>>> = Rc::new(RefCell::new(None));
        let inner = Rc::clone(&slot);
        let sub = signal.subscribe(move |_: &()| {
            // Drop our own guard from inside the handler.
            let _ = inner.borrow_mut().take();
        });
        *slot.borrow_mut() = Some(sub);
        signal.emit(&());
        assert_eq!(signal.subscriber_count(), 0);
        signal.emit(&());
    }

    #[test]
    fn weak_signal_drops_events_after_owner_is_gone() {
        let signal: Signal<i64> = Signal::new();
        let weak = signal.downgrade();
        weak.emit(&1);
        drop(signal);
        weak.emit(&2);
    }

    #[test]
    fn bubbled_prepends_the_segment() {
        let change = FieldChange {
            path: Path::root(),
            old: None,
            new: Some(Value::I64(1)),
        };
        let bubbled = change.bubbled(Segment::name("counter"));
        assert_eq!(bubbled.path.to_string(), "counter");
    }
}
