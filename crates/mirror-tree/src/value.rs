// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Self-describing values carried by change records, patches, and snapshots.
//!
//! The core never interprets structured payloads beyond the shapes it owns
//! (collection op arguments, snapshot states); everything else is opaque to
//! it and round-trips through the serializer untouched. `Map` uses a
//! `BTreeMap` so any encoding of a value is deterministic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TreeError;

/// Discriminant of a [`Value`], used in diagnostics and coercion errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// The null value.
    Null,
    /// Boolean.
    Bool,
    /// Signed 64-bit integer.
    I64,
    /// 64-bit float.
    F64,
    /// UTF-8 string.
    Str,
    /// Opaque byte blob.
    Blob,
    /// Ordered list of values.
    List,
    /// String-keyed map of values.
    Map,
}

impl ValueKind {
    /// Human-readable kind name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::I64 => "i64",
            Self::F64 => "f64",
            Self::Str => "string",
            Self::Blob => "blob",
            Self::List => "list",
            Self::Map => "map",
        }
    }
}

/// A tagged value: the only currency exchanged between the tree and its
/// collaborators (serializer, transport, renderer).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    /// The null value. Marks "absent" in op payloads.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    I64(i64),
    /// 64-bit float.
    F64(f64),
    /// UTF-8 string.
    Str(String),
    /// Opaque byte blob supplied by the serializer collaborator.
    Blob(Vec<u8>),
    /// Ordered list of values.
    List(Vec<Value>),
    /// String-keyed map of values. `BTreeMap` keeps encodings deterministic.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Returns the discriminant of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::I64(_) => ValueKind::I64,
            Self::F64(_) => ValueKind::F64,
            Self::Str(_) => ValueKind::Str,
            Self::Blob(_) => ValueKind::Blob,
            Self::List(_) => ValueKind::List,
            Self::Map(_) => ValueKind::Map,
        }
    }

    /// Returns the boolean payload, if this is a `Bool`.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an `I64`.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I64(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the float payload; `I64` widens losslessly within 2^53.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::F64(x) => Some(*x),
            Self::I64(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Returns the string payload, if this is a `Str`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the list payload, if this is a `List`.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Returns the map payload, if this is a `Map`.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Looks up `key` in a `Map` value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// Builds a `Map` value from `(key, value)` pairs.
    pub fn map_of<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::I64(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::F64(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Blob(bytes)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

fn mismatch(expected: &'static str, actual: &Value) -> TreeError {
    TreeError::TypeMismatch {
        expected,
        actual: actual.kind().name(),
    }
}

/// Conversion seam between typed Rust scalars and tree [`Value`]s.
///
/// Implemented for the primitive scalar set and for [`Value`] itself (which
/// accepts any shape). Custom payload types convert through `Value` on their
/// own terms; the tree does not interpret them.
pub trait Scalar: Clone + PartialEq + 'static {
    /// Wraps the scalar into a [`Value`].
    fn into_value(self) -> Value;

    /// Extracts the scalar from a [`Value`].
    fn from_value(value: &Value) -> Result<Self, TreeError>
    where
        Self: Sized;
}

impl Scalar for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }

    fn from_value(value: &Value) -> Result<Self, TreeError> {
        value.as_bool().ok_or_else(|| mismatch("bool", value))
    }
}

impl Scalar for i64 {
    fn into_value(self) -> Value {
        Value::I64(self)
    }

    fn from_value(value: &Value) -> Result<Self, TreeError> {
        value.as_i64().ok_or_else(|| mismatch("i64", value))
    }
}

impl Scalar for f64 {
    fn into_value(self) -> Value {
        Value::F64(self)
    }

    fn from_value(value: &Value) -> Result<Self, TreeError> {
        value.as_f64().ok_or_else(|| mismatch("f64", value))
    }
}

impl Scalar for String {
    fn into_value(self) -> Value {
        Value::Str(self)
    }

    fn from_value(value: &Value) -> Result<Self, TreeError> {
        value
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| mismatch("string", value))
    }
}

impl Scalar for Value {
    fn into_value(self) -> Value {
        self
    }

    fn from_value(value: &Value) -> Result<Self, TreeError> {
        Ok(value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i64_widens_to_f64() {
        assert_eq!(Value::I64(3).as_f64(), Some(3.0));
        assert_eq!(f64::from_value(&Value::I64(3)).unwrap(), 3.0);
    }

    #[test]
    fn scalar_round_trips() {
        assert_eq!(i64::from_value(&7i64.into_value()).unwrap(), 7);
        assert_eq!(
            String::from_value(&"hi".to_owned().into_value()).unwrap(),
            "hi"
        );
    }

    #[test]
    fn scalar_mismatch_is_reported() {
        let err = i64::from_value(&Value::Str("x".into())).unwrap_err();
        assert_eq!(
            err,
            TreeError::TypeMismatch {
                expected: "i64",
                actual: "string"
            }
        );
    }

    #[test]
    fn map_of_builds_nested_values() {
        let v = Value::map_of([("x", 1.0), ("y", 2.5)]);
        assert_eq!(v.get("x"), Some(&Value::F64(1.0)));
        assert_eq!(v.get("y"), Some(&Value::F64(2.5)));
    }
}
