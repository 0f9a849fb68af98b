// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Root dispatcher for mirror replication sessions.
//!
//! The dispatcher owns the root tracked node and sits between the tree and
//! the transport. Outbound: it subscribes to the root's bubble stream and
//! converts every [`FieldChange`] into a wire [`Patch`]. Inbound: transport
//! threads push records into a bounded [`Inbox`]; [`Session::tick`] drains a
//! bounded number per call on the model thread and routes them into the
//! tree. Echo suppression is structural: inbound application never touches
//! the bubble stream, so there is nothing to filter.
//!
//! Session lifecycle: `Detached → Joining → Synced → Detached`. A joining
//! peer solicits a snapshot and re-requests on a configurable tick timeout;
//! a snapshot failure mid-session drops the peer back to `Joining`.

mod convert;
mod mailbox;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;
use std::sync::mpsc::Receiver;

use mirror_proto::{Message, Patch, Snapshot, SnapshotRequest};
use mirror_tree::{NodeRef, Path, Subscription, TreeError};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use convert::change_to_patch;
pub use mailbox::{Inbox, MailboxError};

/// Who this dispatcher is in the replication topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorityMode {
    /// Owns the world: starts synced, answers snapshot requests, and
    /// re-broadcasts inbound patches after applying them.
    Authoritative,
    /// Shadows the world: joins via snapshot and never re-broadcasts.
    Router,
}

/// Dispatcher lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport attached; nothing flows.
    Detached,
    /// Connected and waiting for a snapshot.
    Joining,
    /// Bidirectional patch flow.
    Synced,
}

/// Tuning knobs for a session. `Default` is a reasonable interactive setup.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of the inbound mailbox.
    pub inbound_capacity: usize,
    /// Upper bound on records drained per [`Session::tick`].
    pub max_drain_per_tick: usize,
    /// Ticks spent in `Joining` before the snapshot request is re-sent.
    pub snapshot_timeout_ticks: u32,
    /// Topology role.
    pub authority: AuthorityMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 256,
            max_drain_per_tick: 64,
            snapshot_timeout_ticks: 120,
            authority: AuthorityMode::Router,
        }
    }
}

/// State events delivered to the caller from [`Session::tick`] and the
/// lifecycle methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The transport came up.
    Connected,
    /// A snapshot applied; the tree now mirrors the authority.
    Snapshotted,
    /// The transport went away; no state was mutated.
    Disconnected,
    /// An inbound patch was dropped without touching the tree.
    PatchRejected {
        /// Path literal of the offending patch.
        path: String,
        /// Routing or coercion failure, rendered.
        reason: String,
    },
    /// An inbound snapshot could not be applied.
    SnapshotRejected {
        /// Type-tag or reconciliation failure, rendered.
        reason: String,
    },
}

/// Errors surfaced by the dispatcher itself. Per-record tree errors are
/// reported as events instead; they never abort a tick.
#[derive(Debug, Error)]
pub enum SessionError {
    /// A tree operation failed outside per-record handling.
    #[error(transparent)]
    Tree(#[from] TreeError),
    /// The outbound queue is full. Surfaced, not retried by the core.
    #[error("transport backpressure")]
    Backpressure,
    /// The transport is gone.
    #[error("transport closed")]
    TransportClosed,
    /// A lifecycle method was called in the wrong state.
    #[error("invalid session state {state:?}: {reason}")]
    InvalidState {
        /// State the session was actually in.
        state: SessionState,
        /// What the caller attempted.
        reason: String,
    },
}

/// Errors a transport implementation can surface on send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The outbound queue is full.
    #[error("outbound queue full")]
    Backpressure,
    /// The connection is gone.
    #[error("transport closed")]
    Closed,
}

/// Outbound seam to the byte-level transport.
///
/// Implementations must not block: the dispatcher calls this on the model
/// thread. Framing, retransmits, and per-connection FIFO ordering are the
/// transport's business.
pub trait Transport {
    /// Hands one outbound record to the transport.
    fn send(&mut self, message: Message) -> Result<(), TransportError>;
}

/// The root dispatcher: owns the root sync node and drives the session.
pub struct Session<T: Transport> {
    root: NodeRef,
    transport: T,
    config: SessionConfig,
    state: SessionState,
    inbound: Receiver<Message>,
    outbound: Rc<RefCell<VecDeque<Patch>>>,
    joining_ticks: u32,
    _root_sub: Subscription,
}

impl<T: Transport> fmt::Debug for Session<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state)
            .field("authority", &self.config.authority)
            .field("outbound_queued", &self.outbound.borrow().len())
            .finish()
    }
}

impl<T: Transport> Session<T> {
    /// Builds a dispatcher around `root`, returning it with the [`Inbox`]
    /// the transport feeds from its own threads.
    pub fn new(root: NodeRef, transport: T, config: SessionConfig) -> (Self, Inbox) {
        let (inbox, inbound) = mailbox::channel(config.inbound_capacity);
        let outbound = Rc::new(RefCell::new(VecDeque::new()));
        let buffer = Rc::clone(&outbound);
        let root_sub = root.subscribe_changes(move |change| {
            buffer.borrow_mut().push_back(convert::change_to_patch(change));
        });
        (
            Self {
                root,
                transport,
                config,
                state: SessionState::Detached,
                inbound,
                outbound,
                joining_ticks: 0,
                _root_sub: root_sub,
            },
            inbox,
        )
    }

    /// The root node this dispatcher replicates.
    #[must_use]
    pub fn root(&self) -> &NodeRef {
        &self.root
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Transport came up. A `Router` starts joining and solicits a snapshot;
    /// an `Authoritative` peer owns the state and is synced immediately.
    pub fn connect(&mut self) -> Result<Vec<SessionEvent>, SessionError> {
        if self.state != SessionState::Detached {
            return Err(SessionError::InvalidState {
                state: self.state,
                reason: "connect on a live session".to_owned(),
            });
        }
        // Anything queued before the connection belongs to a previous life.
        self.discard_inbound();
        match self.config.authority {
            AuthorityMode::Authoritative => {
                self.state = SessionState::Synced;
            }
            AuthorityMode::Router => {
                self.state = SessionState::Joining;
                self.joining_ticks = 0;
                self.request_snapshot("join")?;
            }
        }
        info!(state = ?self.state, "session connected");
        Ok(vec![SessionEvent::Connected])
    }

    /// Transport went away. In-flight inbound records are discarded; the
    /// tree is not mutated.
    pub fn disconnect(&mut self) -> Vec<SessionEvent> {
        self.state = SessionState::Detached;
        self.joining_ticks = 0;
        self.discard_inbound();
        self.outbound.borrow_mut().clear();
        info!("session detached");
        vec![SessionEvent::Disconnected]
    }

    /// One model-thread tick: drain up to `max_drain_per_tick` inbound
    /// records, run the joining timeout, and flush outbound patches.
    pub fn tick(&mut self) -> Result<Vec<SessionEvent>, SessionError> {
        let mut events = Vec::new();
        if self.state != SessionState::Detached {
            for _ in 0..self.config.max_drain_per_tick {
                let Ok(message) = self.inbound.try_recv() else {
                    break;
                };
                self.handle(message, &mut events)?;
            }
            if self.state == SessionState::Joining {
                self.joining_ticks += 1;
                if self.joining_ticks >= self.config.snapshot_timeout_ticks {
                    debug!("snapshot wait timed out, re-requesting");
                    self.joining_ticks = 0;
                    self.request_snapshot("timeout")?;
                }
            }
        }
        self.flush_outbound()?;
        Ok(events)
    }

    fn handle(
        &mut self,
        message: Message,
        events: &mut Vec<SessionEvent>,
    ) -> Result<(), SessionError> {
        match message {
            Message::Patch(patch) => self.handle_patch(&patch, events),
            Message::Snapshot(snapshot) => self.handle_snapshot(&snapshot, events),
            Message::SnapshotRequest(request) => self.handle_snapshot_request(&request),
        }
    }

    fn handle_patch(
        &mut self,
        patch: &Patch,
        events: &mut Vec<SessionEvent>,
    ) -> Result<(), SessionError> {
        if self.state != SessionState::Synced {
            debug!(path = %patch.path, "patch before sync, dropped");
            return Ok(());
        }
        match self.apply_patch(patch) {
            Ok(()) => {
                if self.config.authority == AuthorityMode::Authoritative {
                    // Last-writer-wins at the authority, then fan back out.
                    self.outbound.borrow_mut().push_back(patch.clone());
                }
                Ok(())
            }
            Err(error) => {
                debug!(path = %patch.path, %error, "dropping inbound patch");
                events.push(SessionEvent::PatchRejected {
                    path: patch.path.clone(),
                    reason: error.to_string(),
                });
                Ok(())
            }
        }
    }

    fn apply_patch(&self, patch: &Patch) -> Result<(), TreeError> {
        let path = Path::parse(&patch.path)?;
        self.root.apply_patch(&path, patch.value.as_ref())
    }

    fn handle_snapshot(
        &mut self,
        snapshot: &Snapshot,
        events: &mut Vec<SessionEvent>,
    ) -> Result<(), SessionError> {
        if self.config.authority == AuthorityMode::Authoritative {
            warn!("authoritative peer ignoring an inbound snapshot");
            return Ok(());
        }
        match self
            .root
            .apply_snapshot(&snapshot.type_tag, &snapshot.root_state)
        {
            Ok(()) => {
                self.state = SessionState::Synced;
                self.joining_ticks = 0;
                events.push(SessionEvent::Snapshotted);
                Ok(())
            }
            Err(error) => {
                warn!(%error, "snapshot failed, rejoining");
                events.push(SessionEvent::SnapshotRejected {
                    reason: error.to_string(),
                });
                self.state = SessionState::Joining;
                self.joining_ticks = 0;
                self.request_snapshot("snapshot failure")
            }
        }
    }

    fn handle_snapshot_request(&mut self, request: &SnapshotRequest) -> Result<(), SessionError> {
        match self.config.authority {
            AuthorityMode::Authoritative => {
                debug!(reason = %request.reason, "answering snapshot request");
                let snapshot = Snapshot {
                    type_tag: self.root.type_tag().to_owned(),
                    root_state: self.root.state(),
                };
                self.send(Message::Snapshot(snapshot))
            }
            AuthorityMode::Router => {
                debug!(reason = %request.reason, "router ignoring snapshot request");
                Ok(())
            }
        }
    }

    fn request_snapshot(&mut self, reason: &str) -> Result<(), SessionError> {
        self.send(Message::SnapshotRequest(SnapshotRequest {
            reason: reason.to_owned(),
        }))
    }

    /// Ships buffered outbound patches while synced; anywhere else local
    /// changes are dropped (a joining peer has nothing to say yet).
    fn flush_outbound(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Synced {
            let dropped = self.outbound.borrow_mut().drain(..).count();
            if dropped > 0 {
                debug!(dropped, "local changes dropped while not synced");
            }
            return Ok(());
        }
        loop {
            let Some(patch) = self.outbound.borrow_mut().pop_front() else {
                return Ok(());
            };
            if let Err(error) = self.transport.send(Message::Patch(patch.clone())) {
                // Put it back so the caller can decide; the core does not
                // retry within the tick.
                self.outbound.borrow_mut().push_front(patch);
                warn!(%error, "outbound send failed");
                return Err(error.into());
            }
        }
    }

    fn send(&mut self, message: Message) -> Result<(), SessionError> {
        self.transport.send(message).map_err(SessionError::from)
    }

    fn discard_inbound(&mut self) {
        while self.inbound.try_recv().is_ok() {}
    }
}

impl From<TransportError> for SessionError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Backpressure => Self::Backpressure,
            TransportError::Closed => Self::TransportClosed,
        }
    }
}
