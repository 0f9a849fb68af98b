// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Wire schema for mirror replication sessions.
//!
//! Three record kinds cross the transport: fine-grained [`Patch`]es for
//! steady-state replication, a full [`Snapshot`] to bootstrap a joining
//! peer, and a [`SnapshotRequest`] soliciting one. The [`Message`] envelope
//! carries them; [`wire`] frames envelopes as length-prefixed CBOR packets.
//!
//! Path literals use the tree grammar (`segment ("." segment)*` with `[N]`
//! indices, `["K"]` keys, and the reserved structural opcodes); values are
//! `mirror-tree` tagged values and round-trip untouched.

pub mod wire;

use mirror_tree::Value;
use serde::{Deserialize, Serialize};

/// A fine-grained state patch addressed by a path literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    /// Path literal, e.g. `boxes.[0].pos` or `boxes.move`.
    pub path: String,
    /// New value, or the structural-op payload. `None` encodes removal at
    /// the addressed location (and argument-less ops like `clear`).
    pub value: Option<Value>,
}

/// Full-tree snapshot used to bootstrap or resynchronize a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Identity of the root node type; the receiver refuses a mismatch.
    pub type_tag: String,
    /// Complete root state as extracted by the authoritative tree.
    pub root_state: Value,
}

/// Request for a fresh snapshot from the authoritative peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRequest {
    /// Why the requester wants one (join, resync after failure, ...).
    pub reason: String,
}

/// Envelope for every record exchanged between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Message {
    /// A fine-grained state patch.
    Patch(Patch),
    /// A full-tree snapshot.
    Snapshot(Snapshot),
    /// A solicitation for a snapshot.
    SnapshotRequest(SnapshotRequest),
}

impl From<Patch> for Message {
    fn from(patch: Patch) -> Self {
        Self::Patch(patch)
    }
}

impl From<Snapshot> for Message {
    fn from(snapshot: Snapshot) -> Self {
        Self::Snapshot(snapshot)
    }
}

impl From<SnapshotRequest> for Message {
    fn from(request: SnapshotRequest) -> Self {
        Self::SnapshotRequest(request)
    }
}
