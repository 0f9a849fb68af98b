// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Translation from bubbled [`FieldChange`] records to wire [`Patch`]es.
//!
//! The terminal segment decides the wire form. Cell and map-key changes ship
//! as plain value patches; list structural edits normalize to the reserved
//! opcodes with their arguments folded into the value payload. The mapping is
//! total and unambiguous because member names can never collide with the
//! reserved opcodes (rejected at schema build) and only lists produce
//! index-terminal records.

use mirror_proto::Patch;
use mirror_tree::{FieldChange, Segment, Value};

/// Builds the wire patch for one bubbled change.
#[must_use]
pub fn change_to_patch(change: &FieldChange) -> Patch {
    match change.path.last() {
        Some(Segment::Index(index)) => index_terminal(change, *index),
        Some(Segment::Name(name)) if name.as_ref() == "move" => Patch {
            path: change.path.to_string(),
            value: Some(Value::map_of([
                ("from", change.old.clone().unwrap_or(Value::Null)),
                ("to", change.new.clone().unwrap_or(Value::Null)),
            ])),
        },
        Some(Segment::Name(name)) if name.as_ref() == "clear" => Patch {
            path: change.path.to_string(),
            value: None,
        },
        // `add` lands here too: its payload is the item itself.
        _ => Patch {
            path: change.path.to_string(),
            value: change.new.clone(),
        },
    }
}

/// List structural edits: the old/new presence pattern picks the opcode.
fn index_terminal(change: &FieldChange, index: u32) -> Patch {
    let parent = change.path.parent();
    let (op, value) = match (&change.old, &change.new) {
        (None, Some(item)) => (
            "insert",
            Some(Value::map_of([
                ("index", Value::I64(i64::from(index))),
                ("item", item.clone()),
            ])),
        ),
        (Some(_), None) => (
            "remove",
            Some(Value::map_of([("index", Value::I64(i64::from(index)))])),
        ),
        (Some(_), Some(item)) => (
            "replace",
            Some(Value::map_of([
                ("index", Value::I64(i64::from(index))),
                ("item", item.clone()),
            ])),
        ),
        (None, None) => ("remove", None),
    };
    let path = if parent.is_empty() {
        op.to_owned()
    } else {
        format!("{parent}.{op}")
    };
    Patch { path, value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirror_tree::Path;

    fn change(literal: &str, old: Option<Value>, new: Option<Value>) -> FieldChange {
        FieldChange {
            path: Path::parse(literal).unwrap(),
            old,
            new,
        }
    }

    #[test]
    fn cell_changes_ship_the_new_value() {
        let patch = change_to_patch(&change(
            "player.pos",
            Some(Value::I64(1)),
            Some(Value::I64(2)),
        ));
        assert_eq!(patch.path, "player.pos");
        assert_eq!(patch.value, Some(Value::I64(2)));
    }

    #[test]
    fn map_removal_ships_no_value() {
        let patch = change_to_patch(&change("counters.[\"p1\"]", Some(Value::I64(1)), None));
        assert_eq!(patch.path, "counters.[\"p1\"]");
        assert_eq!(patch.value, None);
    }

    #[test]
    fn list_insert_normalizes_to_the_opcode_form() {
        let patch = change_to_patch(&change("boxes.[0]", None, Some(Value::Bool(true))));
        assert_eq!(patch.path, "boxes.insert");
        assert_eq!(
            patch.value,
            Some(Value::map_of([
                ("index", Value::I64(0)),
                ("item", Value::Bool(true)),
            ]))
        );
    }

    #[test]
    fn list_remove_and_replace_carry_their_index() {
        let removed = change_to_patch(&change("boxes.[2]", Some(Value::Bool(true)), None));
        assert_eq!(removed.path, "boxes.remove");
        assert_eq!(
            removed.value,
            Some(Value::map_of([("index", Value::I64(2))]))
        );

        let replaced = change_to_patch(&change(
            "boxes.[1]",
            Some(Value::Bool(false)),
            Some(Value::Bool(true)),
        ));
        assert_eq!(replaced.path, "boxes.replace");
        assert_eq!(
            replaced.value,
            Some(Value::map_of([
                ("index", Value::I64(1)),
                ("item", Value::Bool(true)),
            ]))
        );
    }

    #[test]
    fn add_ships_the_item_at_the_opcode_path() {
        let patch = change_to_patch(&change("boxes.add", None, Some(Value::Bool(true))));
        assert_eq!(patch.path, "boxes.add");
        assert_eq!(patch.value, Some(Value::Bool(true)));
    }

    #[test]
    fn move_folds_both_indices_into_the_payload() {
        let patch = change_to_patch(&change(
            "boxes.move",
            Some(Value::I64(2)),
            Some(Value::I64(0)),
        ));
        assert_eq!(patch.path, "boxes.move");
        assert_eq!(
            patch.value,
            Some(Value::map_of([
                ("from", Value::I64(2)),
                ("to", Value::I64(0)),
            ]))
        );
    }

    #[test]
    fn clear_ships_no_value() {
        let patch = change_to_patch(&change(
            "counters.clear",
            Some(Value::I64(3)),
            Some(Value::I64(0)),
        ));
        assert_eq!(patch.path, "counters.clear");
        assert_eq!(patch.value, None);
    }
}
