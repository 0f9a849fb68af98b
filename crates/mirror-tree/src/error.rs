// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Error taxonomy for tree construction, routing, and patch application.

use thiserror::Error;

use crate::path::Path;

/// Errors produced by the tracked-tree core.
///
/// Inbound-patch errors (`PathRoute`, `TypeMismatch`, `SnapshotTypeMismatch`)
/// are reported to the caller with the offending path and never corrupt
/// state; the patch is simply dropped. `ReservedCollision` is a
/// registration-time failure and fires before any tree exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TreeError {
    /// A path literal failed to parse.
    #[error("malformed path {literal:?} at byte {offset}: {reason}")]
    PathParse {
        /// The rejected literal, verbatim.
        literal: String,
        /// Byte offset of the first offending character.
        offset: usize,
        /// What the parser expected at that position.
        reason: String,
    },

    /// A path could not be routed to a leaf: unknown child, wrong segment
    /// kind, index out of range, or an unknown map key at a non-terminal
    /// segment.
    #[error("cannot route {path:?}: {reason}")]
    PathRoute {
        /// The offending path in literal form.
        path: String,
        /// Why routing stopped.
        reason: String,
    },

    /// An incoming value could not be coerced to the destination kind.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Kind the destination accepts.
        expected: &'static str,
        /// Kind the value actually carried.
        actual: &'static str,
    },

    /// A snapshot was offered to a tree of a different type.
    #[error("snapshot type mismatch: expected {expected:?}, got {actual:?}")]
    SnapshotTypeMismatch {
        /// Type tag of the local root.
        expected: String,
        /// Type tag carried by the snapshot.
        actual: String,
    },

    /// A declared member name equals a reserved structural opcode or is
    /// otherwise unusable. Rejected when the schema is built.
    #[error("invalid member name {name:?}: {reason}")]
    ReservedCollision {
        /// The rejected member name.
        name: String,
        /// Why the name is unusable.
        reason: String,
    },
}

impl TreeError {
    /// Builds a [`TreeError::PathRoute`] for `path`.
    pub(crate) fn route(path: &Path, reason: impl Into<String>) -> Self {
        Self::PathRoute {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
