use colored::Colorize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum DeltaKind {
    Added(Value),
    Removed(Value),
    Modified { old: Value, new: Value },
}

/// One leaf change with its path from the response root.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaEntry {
    pub path: String,
    pub kind: DeltaKind,
}

/// Flattens a delta into leaf changes, ordered by path.
pub fn delta_entries(delta: &Value) -> Vec<DeltaEntry> {
    let mut entries = Vec::new();
    collect(delta, String::new(), &mut entries);
    entries
}

fn collect(delta: &Value, path: String, out: &mut Vec<DeltaEntry>) {
    match delta {
        Value::Array(parts) => {
            let kind = match parts.as_slice() {
                [added] => DeltaKind::Added(added.clone()),
                [old, new] => DeltaKind::Modified {
                    old: old.clone(),
                    new: new.clone(),
                },
                [removed, _, _] => DeltaKind::Removed(removed.clone()),
                _ => return,
            };
            out.push(DeltaEntry { path, kind });
        }
        Value::Object(map) => {
            let is_array = map.get("_t").and_then(Value::as_str) == Some("a");
            for (key, nested) in map {
                if is_array && key == "_t" {
                    continue;
                }
                let child = if is_array {
                    format!("{path}[{}]", key.trim_start_matches('_'))
                } else if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                collect(nested, child, out);
            }
        }
        _ => {}
    }
}

/// Human-readable rendering used by the console report.
pub fn render_delta(delta: &Value) -> String {
    delta_entries(delta)
        .into_iter()
        .map(|entry| {
            let path = if entry.path.is_empty() {
                "(root)".to_string()
            } else {
                entry.path
            };
            match entry.kind {
                DeltaKind::Added(value) => format!("  {} {path}: {}", "+".green(), compact(&value).green()),
                DeltaKind::Removed(value) => format!("  {} {path}: {}", "-".red(), compact(&value).red()),
                DeltaKind::Modified { old, new } => format!(
                    "  {} {path}: {} => {}",
                    "~".yellow(),
                    compact(&old).red(),
                    compact(&new).green()
                ),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn compact(value: &Value) -> String {
    value.to_string()
}
