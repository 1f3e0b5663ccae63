//! Dotted path utilities
//!
//! A dotted path addresses a location in the state graph, one segment per
//! container level: `user.name`, `todos.2.title`. Sequence indices are plain
//! decimal segments; the bracket form `todos[2].title` is accepted on input.
//!
//! Matching between subscriber paths and changed paths is always aligned to
//! segment boundaries, never to raw substrings (`user` is a prefix of
//! `user.name` but not of `username`).

use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::value::{ContainerId, Key, Value};

/// Segment separator
pub const SEPARATOR: char = '.';

/// Join a parent path and a child segment
pub fn join(parent: &str, segment: &str) -> String {
    if parent.is_empty() {
        segment.to_string()
    } else {
        let mut path = String::with_capacity(parent.len() + 1 + segment.len());
        path.push_str(parent);
        path.push(SEPARATOR);
        path.push_str(segment);
        path
    }
}

/// Drop the leading segment (the state root / internal namespace marker)
///
/// `state.user.name` → `user.name`, `state` → ``.
pub fn relative(path: &str) -> &str {
    match path.find(SEPARATOR) {
        Some(pos) => &path[pos + 1..],
        None => "",
    }
}

/// Split a path into keys, accepting both `a.b.0` and `a.b[0]`
///
/// Numeric segments become [`Key::Index`]; empty segments are skipped.
pub fn segments(path: &str) -> SmallVec<[Key; 4]> {
    let mut keys = SmallVec::new();
    for part in path.split(SEPARATOR) {
        let mut rest = part;
        // Leading name before any bracket
        let name_end = rest.find('[').unwrap_or(rest.len());
        if name_end > 0 {
            keys.push(segment_key(&rest[..name_end]));
        }
        rest = &rest[name_end..];
        while let Some(stripped) = rest.strip_prefix('[') {
            let Some(close) = stripped.find(']') else {
                break;
            };
            let inner = stripped[..close].trim_matches(|c| c == '\'' || c == '"');
            if !inner.is_empty() {
                keys.push(segment_key(inner));
            }
            rest = &stripped[close + 1..];
        }
    }
    keys
}

fn segment_key(segment: &str) -> Key {
    match segment.parse::<usize>() {
        Ok(index) => Key::Index(index),
        Err(_) => Key::Name(segment.to_string()),
    }
}

/// Whether `prefix` addresses `path` or one of its ancestors
///
/// The empty path is the ancestor of everything.
pub fn is_prefix(prefix: &str, path: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    path.starts_with(prefix)
        && (path.len() == prefix.len() || path[prefix.len()..].starts_with(SEPARATOR))
}

/// Whether `ancestor` is a strict (shorter) dot-aligned prefix of `path`
pub fn is_strict_prefix(ancestor: &str, path: &str) -> bool {
    ancestor.len() < path.len() && is_prefix(ancestor, path)
}

/// Read the value at a dotted/indexed path
///
/// Missing intermediates and scalar parents resolve to `None` rather than
/// failing.
pub fn get_at_path(root: &Value, path: &str) -> Option<Value> {
    let mut current = root.clone();
    for key in segments(path) {
        current = current.child(&key)?;
    }
    Some(current)
}

/// Flatten a graph into `(path, leaf)` pairs in depth-first order
///
/// Empty containers appear as leaves so that they are not lost. A container
/// reached again while it is still being walked (a reference cycle) is
/// skipped.
pub fn flatten(root: &Value) -> Vec<(String, Value)> {
    let mut out = Vec::new();
    let mut stack = FxHashSet::default();
    flatten_into(root, String::new(), &mut stack, &mut out);
    out
}

fn flatten_into(
    value: &Value,
    path: String,
    stack: &mut FxHashSet<ContainerId>,
    out: &mut Vec<(String, Value)>,
) {
    let children: Vec<(String, Value)> = match value {
        Value::Record(record) => record.entries(),
        Value::Sequence(sequence) => sequence
            .to_vec()
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => {
            out.push((path, value.clone()));
            return;
        }
    };

    if children.is_empty() {
        out.push((path, value.clone()));
        return;
    }

    let Some(id) = value.container_id() else {
        return;
    };
    if !stack.insert(id) {
        tracing::trace!(path = %path, "flatten: skipping cyclic reference");
        return;
    }
    for (segment, child) in children {
        flatten_into(&child, join(&path, &segment), stack, out);
    }
    stack.remove(&id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Record;
    use serde_json::json;

    #[test]
    fn test_join_and_relative() {
        assert_eq!(join("", "user"), "user");
        assert_eq!(join("state.user", "name"), "state.user.name");
        assert_eq!(relative("state.user.name"), "user.name");
        assert_eq!(relative("state"), "");
    }

    #[test]
    fn test_segments_accepts_brackets() {
        let keys = segments("todos[2].title");
        assert_eq!(
            keys.as_slice(),
            &[
                Key::Name("todos".into()),
                Key::Index(2),
                Key::Name("title".into())
            ]
        );
        assert_eq!(segments("todos.2.title").as_slice(), keys.as_slice());
    }

    #[test]
    fn test_prefix_is_dot_aligned() {
        assert!(is_prefix("user", "user.name"));
        assert!(is_prefix("user", "user"));
        assert!(!is_prefix("user", "username"));
        assert!(is_prefix("", "anything"));
        assert!(is_strict_prefix("user", "user.name"));
        assert!(!is_strict_prefix("user", "user"));
    }

    #[test]
    fn test_get_at_path() {
        let state = Value::from(json!({"a": {"b": [10, {"c": "deep"}]}}));
        assert_eq!(
            get_at_path(&state, "a.b[1].c").and_then(|v| v.as_str().map(String::from)),
            Some("deep".to_string())
        );
        assert!(get_at_path(&state, "a.missing.c").is_none());
        assert!(get_at_path(&state, "a.b.0.c").is_none());
    }

    #[test]
    fn test_flatten_pairs() {
        let state = Value::from(json!({"a": {"b": 1}, "list": [true], "empty": {}}));
        let paths: Vec<String> = flatten(&state).into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["a.b", "list.0", "empty"]);
    }

    #[test]
    fn test_flatten_guards_cycles() {
        let root = Record::new();
        root.insert("n", 1);
        root.insert("self", root.clone());
        let pairs = flatten(&Value::Record(root));
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].0, "n");
    }
}
