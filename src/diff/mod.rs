//! Structural JSON diff.
//!
//! Deltas use the jsondiffpatch shape: objects map changed keys to nested
//! deltas, `[new]` marks an addition, `[old, 0, 0]` a removal and
//! `[old, new]` a modification. Arrays are compared by position and carry
//! `"_t": "a"`, with removed indices written as `_<index>`.

use std::collections::HashSet;

use serde_json::{json, Map, Value};

mod filter;
mod render;

pub use filter::{FilterError, PathFilter, ResponseFilter};
pub use render::{delta_entries, render_delta, DeltaEntry, DeltaKind};

/// Field names skipped at any depth when diffing.
pub type IgnoredFields = HashSet<String>;

/// Returns `None` when both values are equal once ignored fields are dropped.
pub fn diff(old: &Value, new: &Value, ignored: &IgnoredFields) -> Option<Value> {
    match (old, new) {
        (Value::Object(old_map), Value::Object(new_map)) => diff_objects(old_map, new_map, ignored),
        (Value::Array(old_items), Value::Array(new_items)) => {
            diff_arrays(old_items, new_items, ignored)
        }
        _ if old == new => None,
        _ => Some(json!([old, new])),
    }
}

fn diff_objects(
    old: &Map<String, Value>,
    new: &Map<String, Value>,
    ignored: &IgnoredFields,
) -> Option<Value> {
    let mut delta = Map::new();

    for (key, old_value) in old {
        if ignored.contains(key) {
            continue;
        }
        match new.get(key) {
            Some(new_value) => {
                if let Some(nested) = diff(old_value, new_value, ignored) {
                    delta.insert(key.clone(), nested);
                }
            }
            None => {
                delta.insert(key.clone(), json!([old_value, 0, 0]));
            }
        }
    }

    for (key, new_value) in new {
        if ignored.contains(key) || old.contains_key(key) {
            continue;
        }
        delta.insert(key.clone(), json!([new_value]));
    }

    (!delta.is_empty()).then_some(Value::Object(delta))
}

fn diff_arrays(old: &[Value], new: &[Value], ignored: &IgnoredFields) -> Option<Value> {
    let mut delta = Map::new();

    for index in 0..old.len().max(new.len()) {
        match (old.get(index), new.get(index)) {
            (Some(old_value), Some(new_value)) => {
                if let Some(nested) = diff(old_value, new_value, ignored) {
                    delta.insert(index.to_string(), nested);
                }
            }
            (Some(old_value), None) => {
                delta.insert(format!("_{index}"), json!([old_value, 0, 0]));
            }
            (None, Some(new_value)) => {
                delta.insert(index.to_string(), json!([new_value]));
            }
            (None, None) => {}
        }
    }

    if delta.is_empty() {
        return None;
    }
    delta.insert("_t".to_string(), json!("a"));
    Some(Value::Object(delta))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ignored(names: &[&str]) -> IgnoredFields {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn identical_values_have_no_delta() {
        let samples = [
            json!(null),
            json!(1.5),
            json!("text"),
            json!([1, {"a": [true, null]}]),
            json!({"a": {"b": [1, 2, {"c": "d"}]}, "e": null}),
        ];
        for sample in samples {
            assert_eq!(diff(&sample, &sample, &ignored(&[])), None);
            assert_eq!(diff(&sample, &sample, &ignored(&["a", "c"])), None);
        }
    }

    #[test]
    fn ignored_fields_are_skipped_at_any_depth() {
        let old = json!({"a": 1, "debug": "x", "items": [{"id": 1, "buildInfo": "old"}]});
        let new = json!({"a": 1, "debug": "y", "items": [{"id": 1, "buildInfo": "new"}]});

        assert_eq!(diff(&old, &new, &ignored(&["debug", "buildInfo"])), None);
        assert!(diff(&old, &new, &ignored(&["debug"])).is_some());
    }

    #[test]
    fn ignored_fields_present_on_one_side_only() {
        let old = json!({"a": 1});
        let new = json!({"a": 1, "debug": {"trace": true}});
        assert_eq!(diff(&old, &new, &ignored(&["debug"])), None);
    }

    #[test]
    fn modified_added_and_removed_fields() {
        let old = json!({"a": 1, "gone": true, "nested": {"b": "x"}});
        let new = json!({"a": 2, "fresh": [1], "nested": {"b": "y"}});

        let delta = diff(&old, &new, &ignored(&[])).expect("values differ");
        assert_eq!(
            delta,
            json!({
                "a": [1, 2],
                "gone": [true, 0, 0],
                "fresh": [[1]],
                "nested": {"b": ["x", "y"]}
            })
        );
    }

    #[test]
    fn arrays_compare_by_position() {
        let old = json!([1, 2, 3]);
        let new = json!([1, 5]);

        let delta = diff(&old, &new, &ignored(&[])).expect("values differ");
        assert_eq!(delta, json!({"_t": "a", "1": [2, 5], "_2": [3, 0, 0]}));

        let grown = diff(&json!([]), &json!(["x"]), &ignored(&[])).expect("values differ");
        assert_eq!(grown, json!({"_t": "a", "0": [["x"]]}));
    }

    #[test]
    fn type_changes_are_modifications() {
        let delta = diff(&json!({"a": [1]}), &json!({"a": "1"}), &ignored(&[]));
        assert_eq!(delta, Some(json!({"a": [[1], "1"]})));
    }
}
