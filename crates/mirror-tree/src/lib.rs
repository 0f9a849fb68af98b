// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! mirror-tree: the change-tracking and patch-application core of the mirror
//! replication library.
//!
//! One authoritative peer holds a mutable world tree; other peers keep shadow
//! copies. Local mutations on tracked leaves bubble [`FieldChange`] records up
//! to a root observer; remote patches route back down by [`Path`] and apply
//! *silently*, so a peer never echoes back what it was just sent. Snapshots
//! use the same path vocabulary to reconcile a whole tree at once.
//!
//! The trackable set is closed: [`NodeRef`] (composite), [`CellRef`] (scalar
//! slot), [`ListRef`] (ordered), and [`MapRef`] (keyed). Node types are
//! declared with an explicit [`NodeSchema`] member table; there is no runtime
//! reflection. Everything here is single-threaded by construction (`Rc`
//! handles): all mutation happens on the model thread, and the transport
//! boundary lives a crate above.

mod cell;
mod change;
mod error;
mod list;
mod map;
mod node;
mod path;
mod schema;
mod value;

/// Tracked scalar slot handle.
pub use cell::CellRef;
/// Change records, signals, and subscription guards.
pub use change::{ChangeBus, FieldChange, Signal, Subscription};
/// Error taxonomy for parsing, routing, and application.
pub use error::TreeError;
/// Ordered tracked collection handle.
pub use list::ListRef;
/// Keyed tracked collection handle.
pub use map::MapRef;
/// Tracked composite node handle (and sync surface at the root).
pub use node::NodeRef;
/// Path vocabulary: segments, literals, reserved opcodes.
pub use path::{is_reserved_op, Path, Segment, RESERVED_OPS};
/// Declarative member tables for node types.
pub use schema::{CellDecl, CellKind, Comparator, ElementDecl, NodeSchema, SchemaBuilder};
/// Tagged values and the typed-scalar conversion seam.
pub use value::{Scalar, Value, ValueKind};
