// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Field-path addressing: typed segments, strict parsing, and formatting.
//!
//! Literal wire form: segments joined by `.`, list indices rendered as `[N]`,
//! map keys as `["K"]` (quotes mandatory). Segment kind for a position is
//! inferred from the owning container at dispatch time, not from the literal;
//! parsing only preserves the raw shape.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use crate::error::TreeError;

/// Reserved structural opcode names for collection operations.
///
/// A declared member name colliding with one of these is rejected when the
/// owning schema is built.
pub const RESERVED_OPS: [&str; 6] = ["add", "insert", "remove", "replace", "move", "clear"];

/// Returns `true` if `name` is a reserved structural opcode.
#[must_use]
pub fn is_reserved_op(name: &str) -> bool {
    RESERVED_OPS.contains(&name)
}

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// A field or member name. Never starts with `_`.
    Name(Arc<str>),
    /// A list position.
    Index(u32),
    /// A map key.
    Key(Arc<str>),
}

impl Segment {
    /// Builds a `Name` segment.
    #[must_use]
    pub fn name(name: &str) -> Self {
        Self::Name(Arc::from(name))
    }

    /// Builds a `Key` segment.
    #[must_use]
    pub fn key(key: &str) -> Self {
        Self::Key(Arc::from(key))
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "{name}"),
            Self::Index(i) => write!(f, "[{i}]"),
            Self::Key(key) => write!(f, "[\"{key}\"]"),
        }
    }
}

/// An ordered sequence of segments addressing a location in the tree.
///
/// The empty path denotes "this node". Paths compare structurally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Path {
    segments: VecDeque<Segment>,
}

impl Path {
    /// The empty path ("this node").
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    /// Number of segments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// `true` when the path addresses "this node".
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Returns the segment at `at`, if any.
    #[must_use]
    pub fn segment(&self, at: usize) -> Option<&Segment> {
        self.segments.get(at)
    }

    /// Returns the last segment, if any.
    #[must_use]
    pub fn last(&self) -> Option<&Segment> {
        self.segments.back()
    }

    /// Iterates the segments front to back.
    pub fn iter(&self) -> impl Iterator<Item = &Segment> + '_ {
        self.segments.iter()
    }

    /// Prepends `segment` in place. Used by bubbling.
    pub fn prepend(&mut self, segment: Segment) {
        self.segments.push_front(segment);
    }

    /// Appends `segment` in place.
    pub fn push(&mut self, segment: Segment) {
        self.segments.push_back(segment);
    }

    /// Splits off the head segment, returning it and the remainder.
    /// Used by routing.
    #[must_use]
    pub fn split_head(&self) -> Option<(Segment, Self)> {
        let mut rest = self.clone();
        rest.segments.pop_front().map(|head| (head, rest))
    }

    /// Returns the path without its final segment.
    #[must_use]
    pub fn parent(&self) -> Self {
        let mut parent = self.clone();
        let _ = parent.segments.pop_back();
        parent
    }

    /// Parses a literal of the form `name.[3].["key"]`.
    ///
    /// Strict: rejects empty segments, unmatched brackets, unquoted keys, and
    /// names that start with `_` or contain bracket or quote characters. The
    /// empty literal parses to the empty path.
    pub fn parse(literal: &str) -> Result<Self, TreeError> {
        let mut segments = VecDeque::new();
        if literal.is_empty() {
            return Ok(Self { segments });
        }
        let bytes = literal.as_bytes();
        let mut at = 0usize;
        loop {
            let (segment, next) = parse_segment(literal, bytes, at)?;
            segments.push_back(segment);
            if next == bytes.len() {
                break;
            }
            // parse_segment stops only at end of input or a separator
            at = next + 1;
            if at == bytes.len() {
                return Err(parse_err(literal, next, "trailing separator"));
            }
        }
        Ok(Self { segments })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromIterator<Segment> for Path {
    fn from_iter<I: IntoIterator<Item = Segment>>(iter: I) -> Self {
        Self {
            segments: iter.into_iter().collect(),
        }
    }
}

impl From<Segment> for Path {
    fn from(segment: Segment) -> Self {
        std::iter::once(segment).collect()
    }
}

fn parse_err(literal: &str, offset: usize, reason: &str) -> TreeError {
    TreeError::PathParse {
        literal: literal.to_owned(),
        offset,
        reason: reason.to_owned(),
    }
}

/// Validates a bare name: ASCII-alphabetic head, alphanumeric or `_` tail.
pub(crate) fn valid_member_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_segment(
    literal: &str,
    bytes: &[u8],
    start: usize,
) -> Result<(Segment, usize), TreeError> {
    if bytes[start] == b'[' {
        parse_bracketed(literal, bytes, start)
    } else {
        parse_name(literal, bytes, start)
    }
}

fn parse_name(literal: &str, bytes: &[u8], start: usize) -> Result<(Segment, usize), TreeError> {
    let mut end = start;
    while end < bytes.len() && bytes[end] != b'.' {
        end += 1;
    }
    let name = &literal[start..end];
    if name.is_empty() {
        return Err(parse_err(literal, start, "empty segment"));
    }
    if !valid_member_name(name) {
        return Err(parse_err(
            literal,
            start,
            "name must be ASCII-alphabetic then alphanumeric or '_'",
        ));
    }
    Ok((Segment::name(name), end))
}

fn parse_bracketed(
    literal: &str,
    bytes: &[u8],
    start: usize,
) -> Result<(Segment, usize), TreeError> {
    let inner = start + 1;
    if inner >= bytes.len() {
        return Err(parse_err(literal, start, "unmatched '['"));
    }
    let (segment, close) = if bytes[inner] == b'"' {
        let key_start = inner + 1;
        let Some(quote_len) = literal[key_start..].find('"') else {
            return Err(parse_err(literal, inner, "unterminated key quote"));
        };
        let key_end = key_start + quote_len;
        if key_end + 1 >= bytes.len() || bytes[key_end + 1] != b']' {
            return Err(parse_err(literal, key_end, "expected ']' after key"));
        }
        (Segment::key(&literal[key_start..key_end]), key_end + 1)
    } else {
        let mut end = inner;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
        if end == inner {
            return Err(parse_err(literal, inner, "expected digits or quoted key"));
        }
        if end >= bytes.len() || bytes[end] != b']' {
            return Err(parse_err(literal, end, "unmatched '['"));
        }
        let Ok(index) = literal[inner..end].parse::<u32>() else {
            return Err(parse_err(literal, inner, "index out of range"));
        };
        (Segment::Index(index), end)
    };
    let next = close + 1;
    if next < bytes.len() && bytes[next] != b'.' {
        return Err(parse_err(literal, next, "expected '.' after ']'"));
    }
    Ok((segment, next))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_and_format_round_trip() {
        for literal in [
            "",
            "counter",
            "boxes.[3].pos",
            "counters.[\"p one\"].value",
            "a.b.c",
            "boxes.move",
            "xs.[0]",
            "m.[\"k.with[dots\"]",
        ] {
            let path = Path::parse(literal).unwrap();
            assert_eq!(path.to_string(), literal, "round-trip of {literal:?}");
        }
    }

    #[test]
    fn rejects_malformed_literals() {
        for literal in [
            ".",
            "a..b",
            "a.",
            ".a",
            "[3",
            "a.[x]",
            "a.[\"k]",
            "a.[3]x",
            "_hidden",
            "a._b",
            "a.[18446744073709551616]",
            "we\u{1f600}ird",
        ] {
            assert!(
                matches!(Path::parse(literal), Err(TreeError::PathParse { .. })),
                "expected parse failure for {literal:?}"
            );
        }
    }

    #[test]
    fn index_and_key_shapes_are_distinct() {
        let by_index = Path::parse("xs.[3]").unwrap();
        let by_key = Path::parse("xs.[\"3\"]").unwrap();
        assert_ne!(by_index, by_key);
        assert_eq!(by_index.segment(1), Some(&Segment::Index(3)));
        assert_eq!(by_key.segment(1), Some(&Segment::key("3")));
    }

    #[test]
    fn split_head_and_prepend_are_inverses() {
        let path = Path::parse("a.[1].b").unwrap();
        let (head, rest) = path.split_head().unwrap();
        assert_eq!(head, Segment::name("a"));
        assert_eq!(rest.to_string(), "[1].b");
        let mut back = rest;
        back.prepend(head);
        assert_eq!(back, path);
    }

    #[test]
    fn reserved_ops_parse_as_names() {
        let path = Path::parse("boxes.move").unwrap();
        assert_eq!(path.segment(1), Some(&Segment::name("move")));
        assert!(is_reserved_op("move"));
        assert!(!is_reserved_op("position"));
    }

    #[test]
    fn parent_drops_the_final_segment() {
        let path = Path::parse("a.b.[2]").unwrap();
        assert_eq!(path.parent().to_string(), "a.b");
        assert_eq!(Path::root().parent(), Path::root());
    }
}
