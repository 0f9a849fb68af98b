// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Declarative member tables for tracked node types.
//!
//! The original model discovered members through runtime reflection; here the
//! child set and its kinds are fixed at type definition by an explicit
//! schema. Validation happens once, when the schema is built: member names
//! must be plain identifiers, must not start with `_`, and must not collide
//! with the reserved structural opcodes.

use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use crate::error::TreeError;
use crate::path::{is_reserved_op, valid_member_name};
use crate::value::Value;

/// Value kind accepted by a tracked cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    /// Booleans.
    Bool,
    /// Signed 64-bit integers.
    I64,
    /// 64-bit floats. Incoming `I64` widens.
    F64,
    /// UTF-8 strings.
    Str,
    /// Opaque byte blobs.
    Blob,
    /// Any value shape (structured opaque payloads).
    Any,
}

impl CellKind {
    /// Human-readable kind name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I64 => "i64",
            Self::F64 => "f64",
            Self::Str => "string",
            Self::Blob => "blob",
            Self::Any => "any",
        }
    }

    /// Checks `value` against this kind, widening where defined.
    pub(crate) fn coerce(self, value: Value) -> Result<Value, TreeError> {
        match (self, value) {
            (Self::Any, v) => Ok(v),
            (Self::Bool, v @ Value::Bool(_))
            | (Self::I64, v @ Value::I64(_))
            | (Self::F64, v @ Value::F64(_))
            | (Self::Str, v @ Value::Str(_))
            | (Self::Blob, v @ Value::Blob(_)) => Ok(v),
            (Self::F64, Value::I64(n)) => Ok(Value::F64(n as f64)),
            (kind, v) => Err(TreeError::TypeMismatch {
                expected: kind.name(),
                actual: v.kind().name(),
            }),
        }
    }
}

/// Equality predicate for cell values. `None` means `PartialEq`.
pub type Comparator = Rc<dyn Fn(&Value, &Value) -> bool>;

/// Declaration of one tracked cell member.
#[derive(Clone)]
pub struct CellDecl {
    pub(crate) kind: CellKind,
    pub(crate) default: Value,
    pub(crate) track_outgoing: bool,
    pub(crate) accept_incoming: bool,
    pub(crate) comparator: Option<Comparator>,
}

impl CellDecl {
    /// Declares a cell of `kind` starting at `default`.
    pub fn new(kind: CellKind, default: impl Into<Value>) -> Self {
        Self {
            kind,
            default: default.into(),
            track_outgoing: true,
            accept_incoming: true,
            comparator: None,
        }
    }

    /// Stops local mutations of this cell from emitting outgoing changes.
    #[must_use]
    pub fn untracked(mut self) -> Self {
        self.track_outgoing = false;
        self
    }

    /// Makes the cell ignore incoming patches.
    #[must_use]
    pub fn ignore_incoming(mut self) -> Self {
        self.accept_incoming = false;
        self
    }

    /// Installs a custom equality predicate for the no-op-set check.
    #[must_use]
    pub fn with_comparator(mut self, eq: impl Fn(&Value, &Value) -> bool + 'static) -> Self {
        self.comparator = Some(Rc::new(eq));
        self
    }

    /// Convenience comparator for `F64` cells: values within `epsilon` are
    /// considered equal and do not re-emit.
    #[must_use]
    pub fn with_epsilon(self, epsilon: f64) -> Self {
        self.with_comparator(move |a, b| match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() <= epsilon,
            _ => a == b,
        })
    }
}

impl fmt::Debug for CellDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CellDecl")
            .field("kind", &self.kind)
            .field("default", &self.default)
            .field("track_outgoing", &self.track_outgoing)
            .field("accept_incoming", &self.accept_incoming)
            .field("custom_comparator", &self.comparator.is_some())
            .finish()
    }
}

/// Element declaration for tracked collections.
#[derive(Debug, Clone)]
pub enum ElementDecl {
    /// Scalar elements of the given kind (unwired).
    Scalar(CellKind),
    /// Nested tracked nodes built from a schema (wired).
    Node(NodeSchema),
}

/// The kind of one declared member.
#[derive(Debug, Clone)]
pub(crate) enum MemberKind {
    Cell(CellDecl),
    Node(NodeSchema),
    List(ElementDecl),
    Map(ElementDecl),
}

#[derive(Debug)]
pub(crate) struct MemberDef {
    pub(crate) name: Arc<str>,
    pub(crate) kind: MemberKind,
}

#[derive(Debug)]
struct SchemaInner {
    type_tag: String,
    members: Vec<MemberDef>,
}

/// Immutable, shared declaration table for a node type.
///
/// Declaration order is significant: snapshot reconciliation walks members in
/// the order they were declared.
#[derive(Debug, Clone)]
pub struct NodeSchema {
    inner: Rc<SchemaInner>,
}

impl NodeSchema {
    /// Starts a builder for a node type identified by `type_tag`.
    #[must_use]
    pub fn builder(type_tag: &str) -> SchemaBuilder {
        SchemaBuilder {
            type_tag: type_tag.to_owned(),
            members: Vec::new(),
        }
    }

    /// Identity used to validate snapshot compatibility.
    #[must_use]
    pub fn type_tag(&self) -> &str {
        &self.inner.type_tag
    }

    /// Declared member names, in declaration order.
    pub fn member_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.inner.members.iter().map(|m| m.name.as_ref())
    }

    pub(crate) fn members(&self) -> &[MemberDef] {
        &self.inner.members
    }

    pub(crate) fn member(&self, name: &str) -> Option<(usize, &MemberDef)> {
        self.inner
            .members
            .iter()
            .enumerate()
            .find(|(_, m)| m.name.as_ref() == name)
    }
}

/// Accumulates member declarations; [`SchemaBuilder::build`] validates.
#[derive(Debug)]
pub struct SchemaBuilder {
    type_tag: String,
    members: Vec<MemberDef>,
}

impl SchemaBuilder {
    /// Declares a scalar cell member.
    #[must_use]
    pub fn cell(self, name: &str, decl: CellDecl) -> Self {
        self.member(name, MemberKind::Cell(decl))
    }

    /// Declares a nested node member.
    #[must_use]
    pub fn child(self, name: &str, schema: NodeSchema) -> Self {
        self.member(name, MemberKind::Node(schema))
    }

    /// Declares an ordered collection member.
    #[must_use]
    pub fn list(self, name: &str, element: ElementDecl) -> Self {
        self.member(name, MemberKind::List(element))
    }

    /// Declares a keyed collection member.
    #[must_use]
    pub fn map(self, name: &str, element: ElementDecl) -> Self {
        self.member(name, MemberKind::Map(element))
    }

    fn member(mut self, name: &str, kind: MemberKind) -> Self {
        self.members.push(MemberDef {
            name: Arc::from(name),
            kind,
        });
        self
    }

    /// Validates the accumulated declarations and freezes the schema.
    ///
    /// Fails fast on reserved-opcode collisions, `_`-prefixed or otherwise
    /// malformed names, duplicate members, and cell defaults that do not
    /// match their declared kind.
    pub fn build(self) -> Result<NodeSchema, TreeError> {
        for (i, member) in self.members.iter().enumerate() {
            let name = member.name.as_ref();
            if is_reserved_op(name) {
                return Err(TreeError::ReservedCollision {
                    name: name.to_owned(),
                    reason: "collides with a reserved structural opcode".to_owned(),
                });
            }
            if !valid_member_name(name) {
                return Err(TreeError::ReservedCollision {
                    name: name.to_owned(),
                    reason: "member names are ASCII-alphabetic then alphanumeric or '_'"
                        .to_owned(),
                });
            }
            if self.members[..i].iter().any(|m| m.name == member.name) {
                return Err(TreeError::ReservedCollision {
                    name: name.to_owned(),
                    reason: "duplicate member".to_owned(),
                });
            }
            if let MemberKind::Cell(decl) = &member.kind {
                let _ = decl.kind.coerce(decl.default.clone())?;
            }
        }
        Ok(NodeSchema {
            inner: Rc::new(SchemaInner {
                type_tag: self.type_tag,
                members: self.members,
            }),
        })
    }
}
