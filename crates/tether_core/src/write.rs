//! Mutation-tracking write accessor
//!
//! A [`Writer`] wraps one container of the state graph. Every mutation made
//! through it is applied to the container, recorded as a change at the
//! container's wrap-time path, and schedules a frame.
//!
//! Path rules:
//! - record field write: `<record path>.<key>`
//! - any sequence mutation: the sequence's own path
//!
//! Writing a value that is `same` as the current one records nothing.
//!
//! Containers attached to the graph without going through a writer are not
//! marked, so [`Writer::at`] on them yields an *untracked* writer: its writes
//! land in the graph but nobody is notified. Re-assigning such a container
//! through a tracked writer makes it reactive.

use std::rc::Rc;

use crate::classify::is_plain;
use crate::engine::EngineInner;
use crate::error::Fault;
use crate::path;
use crate::value::{Key, Value};

/// Write accessor for one container
#[derive(Clone)]
pub struct Writer {
    target: Value,
    path: Option<String>,
    is_root: bool,
    engine: Rc<EngineInner>,
}

impl Writer {
    pub(crate) fn new(
        target: Value,
        path: Option<String>,
        is_root: bool,
        engine: Rc<EngineInner>,
    ) -> Self {
        Self {
            target,
            path,
            is_root,
            engine,
        }
    }

    /// The wrapped container
    pub fn value(&self) -> Value {
        self.target.clone()
    }

    /// Wrap-time path of the container, `None` for untracked writers
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Whether writes through this accessor are recorded
    pub fn is_tracked(&self) -> bool {
        self.path.is_some()
    }

    /// Read a child without tracking. Missing keys yield `Null`.
    pub fn get(&self, key: impl Into<Key>) -> Value {
        self.target.child(&key.into()).unwrap_or_default()
    }

    /// Read a nested value by relative path without tracking
    pub fn get_path(&self, relative: &str) -> Value {
        path::get_at_path(&self.target, relative).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        match &self.target {
            Value::Record(record) => record.len(),
            Value::Sequence(sequence) => sequence.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        match &self.target {
            Value::Record(record) => record.keys(),
            Value::Sequence(sequence) => (0..sequence.len()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    /// Writer for a child container
    ///
    /// `None` if the child is missing or a scalar.
    pub fn at(&self, key: impl Into<Key>) -> Option<Writer> {
        let child = self.target.child(&key.into())?;
        self.for_container(&child)
    }

    /// Writer for a nested container by relative path
    pub fn at_path(&self, relative: &str) -> Option<Writer> {
        let child = path::get_at_path(&self.target, relative)?;
        self.for_container(&child)
    }

    /// Writer for any container of the same engine
    ///
    /// Tracked if the container was marked, untracked otherwise.
    pub fn for_container(&self, value: &Value) -> Option<Writer> {
        if !is_plain(value) {
            return None;
        }
        let path = self.engine.marks.borrow().path_of(value).map(String::from);
        if path.is_none() {
            tracing::trace!(kind = value.type_name(), "untracked writer for unmarked container");
        }
        Some(Writer::new(value.clone(), path, false, self.engine.clone()))
    }

    // =========================================================================
    // MUTATIONS
    // =========================================================================

    /// Assign a field or element
    ///
    /// Returns `false` when nothing changed (same value, or the write could
    /// not be applied).
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Value>) -> bool {
        let key = key.into();
        let value = value.into();

        if self.target.child(&key).is_some_and(|current| current.same(&value)) {
            return false;
        }

        match &self.target {
            Value::Record(record) => {
                let segment = key.segment();
                if self.is_internal(&segment) {
                    record.insert(segment, value);
                    return true;
                }
                let child_path = self.child_path(&segment);
                if let Some(child_path) = &child_path {
                    self.instrument(&value, child_path.clone());
                }
                record.insert(segment, value.clone());
                if let Some(child_path) = child_path {
                    self.engine.record(child_path, value);
                }
                true
            }
            Value::Sequence(sequence) => {
                let Some(index) = key.as_index() else {
                    self.ignore(&key.segment(), "sequence index must be numeric");
                    return false;
                };
                if index > sequence.len() {
                    self.ignore(&index.to_string(), "sequence index past the end");
                    return false;
                }
                if let Some(child_path) = self.child_path(&index.to_string()) {
                    self.instrument(&value, child_path);
                }
                sequence.set(index, value);
                self.record_self();
                true
            }
            _ => false,
        }
    }

    /// Assign at a relative path, descending through containers
    ///
    /// The last segment is written through the writer of its parent, so the
    /// recorded path follows the parent's marking.
    pub fn set_path(&self, relative: &str, value: impl Into<Value>) -> bool {
        let mut keys = path::segments(relative);
        let Some(last) = keys.pop() else {
            return false;
        };

        let mut parent = self.clone();
        for key in keys {
            let segment = key.segment();
            match parent.at(key) {
                Some(next) => parent = next,
                None => {
                    self.ignore(relative, &format!("`{}` is not a container", segment));
                    return false;
                }
            }
        }
        parent.set(last, value)
    }

    /// Remove a record field or sequence element, returning it
    pub fn remove(&self, key: impl Into<Key>) -> Option<Value> {
        let key = key.into();
        match &self.target {
            Value::Record(record) => {
                let segment = key.segment();
                let removed = record.remove(&segment)?;
                if !self.is_internal(&segment) {
                    if let Some(child_path) = self.child_path(&segment) {
                        self.engine.record(child_path, Value::Null);
                    }
                }
                Some(removed)
            }
            Value::Sequence(_) => self.remove_at(key.as_index()?),
            _ => None,
        }
    }

    /// Append to a sequence
    pub fn push(&self, value: impl Into<Value>) -> bool {
        let value = value.into();
        let Value::Sequence(sequence) = &self.target else {
            self.ignore_self("push on a non-sequence");
            return false;
        };
        if let Some(child_path) = self.child_path(&sequence.len().to_string()) {
            self.instrument(&value, child_path);
        }
        sequence.push(value);
        self.record_self();
        true
    }

    /// Insert into a sequence (index clamped to the length)
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> bool {
        let value = value.into();
        let Value::Sequence(sequence) = &self.target else {
            self.ignore_self("insert on a non-sequence");
            return false;
        };
        let index = index.min(sequence.len());
        if let Some(child_path) = self.child_path(&index.to_string()) {
            self.instrument(&value, child_path);
        }
        sequence.insert(index, value);
        self.record_self();
        true
    }

    /// Remove a sequence element
    pub fn remove_at(&self, index: usize) -> Option<Value> {
        let Value::Sequence(sequence) = &self.target else {
            self.ignore_self("remove_at on a non-sequence");
            return None;
        };
        let removed = sequence.remove(index)?;
        self.record_self();
        Some(removed)
    }

    /// Empty the container
    ///
    /// Record fields are removed one by one, each recording its own path.
    pub fn clear(&self) {
        match &self.target {
            Value::Record(record) => {
                for key in record.keys() {
                    self.remove(key);
                }
            }
            Value::Sequence(sequence) => {
                if sequence.is_empty() {
                    return;
                }
                sequence.clear();
                self.record_self();
            }
            _ => {}
        }
    }

    /// Replace a sequence's contents, keeping its identity
    pub fn replace(&self, values: Vec<Value>) -> bool {
        let Value::Sequence(sequence) = &self.target else {
            self.ignore_self("replace on a non-sequence");
            return false;
        };
        if let Some(path) = &self.path {
            for (index, value) in values.iter().enumerate() {
                self.instrument(value, path::join(path, &index.to_string()));
            }
        }
        sequence.replace(values);
        self.record_self();
        true
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn is_internal(&self, segment: &str) -> bool {
        self.is_root && segment == self.engine.config.internal_key
    }

    fn child_path(&self, segment: &str) -> Option<String> {
        self.path.as_deref().map(|path| path::join(path, segment))
    }

    fn instrument(&self, value: &Value, path: String) {
        if is_plain(value) {
            self.engine.instrument(value, path, false);
        }
    }

    fn record_self(&self) {
        if let Some(path) = &self.path {
            self.engine.record(path.clone(), self.target.clone());
        }
    }

    fn ignore(&self, segment: &str, reason: &str) {
        let path = match &self.path {
            Some(path) => path::join(path, segment),
            None => segment.to_string(),
        };
        self.engine.diagnostics.report(Fault::IgnoredWrite {
            path,
            reason: reason.to_string(),
        });
    }

    fn ignore_self(&self, reason: &str) {
        self.engine.diagnostics.report(Fault::IgnoredWrite {
            path: self.path.clone().unwrap_or_default(),
            reason: reason.to_string(),
        });
    }
}

impl std::fmt::Debug for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Writer")
            .field("path", &self.path)
            .field("kind", &self.target.type_name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::config::EngineConfig;
    use crate::engine::Engine;
    use crate::value::{Record, Value};
    use serde_json::json;

    fn paths(engine: &Engine) -> Vec<String> {
        engine.pending_changes().into_iter().map(|c| c.path).collect()
    }

    #[test]
    fn test_record_write_records_child_path() {
        let (engine, _) = Engine::with_frame_queue(EngineConfig::default());
        let root = engine.wrap(Value::from(json!({"user": {"name": "ada"}})));

        let user = root.at("user").unwrap();
        assert_eq!(user.path(), Some("state.user"));
        assert!(user.set("name", "grace"));
        assert_eq!(paths(&engine), vec!["state.user.name"]);
        assert_eq!(root.get_path("user.name").as_str(), Some("grace"));
    }

    #[test]
    fn test_assigned_container_becomes_reactive() {
        let (engine, _) = Engine::with_frame_queue(EngineConfig::default());
        let root = engine.wrap(Value::from(json!({})));

        root.set("profile", Value::from(json!({"age": 30})));
        let profile = root.at("profile").unwrap();
        assert_eq!(profile.path(), Some("state.profile"));

        profile.set("age", 31);
        assert_eq!(paths(&engine), vec!["state.profile", "state.profile.age"]);
    }

    #[test]
    fn test_late_bound_container_is_untracked() {
        let (engine, _) = Engine::with_frame_queue(EngineConfig::default());
        let root = engine.wrap(Value::from(json!({"holder": {}})));

        // Attached behind the writer's back
        let sneaky = Record::new();
        root.value()
            .as_record()
            .unwrap()
            .get("holder")
            .unwrap()
            .as_record()
            .unwrap()
            .insert("inner", sneaky);

        let inner = root.at_path("holder.inner").unwrap();
        assert!(!inner.is_tracked());
        assert!(inner.set("x", 1));
        assert!(engine.pending_changes().is_empty());
        assert_eq!(root.get_path("holder.inner.x").as_f64(), Some(1.0));
    }

    #[test]
    fn test_internal_key_is_not_recorded() {
        let (engine, _) = Engine::with_frame_queue(EngineConfig::default());
        let root = engine.wrap(Value::from(json!({"$internal": {"cache": 1}})));

        assert!(root.set("$internal", Value::from(json!({"cache": 2}))));
        assert!(engine.pending_changes().is_empty());
        assert!(root.at("$internal").is_some_and(|w| !w.is_tracked()));
    }

    #[test]
    fn test_sequence_mutators() {
        let (engine, _) = Engine::with_frame_queue(EngineConfig::default());
        let root = engine.wrap(Value::from(json!({"items": [1, 2, 3]})));
        let items = root.at("items").unwrap();

        items.push(4);
        items.insert(0, 0);
        assert_eq!(items.remove_at(2).and_then(|v| v.as_f64()), Some(2.0));
        assert_eq!(items.len(), 4);
        items.clear();
        assert!(items.is_empty());
        items.clear();

        assert_eq!(paths(&engine), vec!["state.items"; 4]);
    }

    #[test]
    fn test_set_path_descends() {
        let (engine, _) = Engine::with_frame_queue(EngineConfig::default());
        let root = engine.wrap(Value::from(json!({"todos": [{"done": false}]})));

        assert!(root.set_path("todos.0.done", true));
        assert_eq!(paths(&engine), vec!["state.todos.0.done"]);

        assert!(!root.set_path("todos.0.done.deeper", 1));
        assert_eq!(engine.diagnostics().total(), 1);
    }

    #[test]
    fn test_sequence_write_past_end_is_ignored() {
        let (engine, _) = Engine::with_frame_queue(EngineConfig::default());
        let root = engine.wrap(Value::from(json!({"xs": [1]})));

        assert!(!root.set_path("xs.18446744073709551615", 1));
        assert!(!root.set_path("xs.3", 1));
        assert_eq!(engine.diagnostics().total(), 2);
        match engine.diagnostics().recent().first() {
            Some(crate::error::Fault::IgnoredWrite { path, .. }) => {
                assert_eq!(path, "state.xs.18446744073709551615")
            }
            other => panic!("unexpected fault: {:?}", other),
        }

        // Writing at the length appends
        assert!(root.set_path("xs.1", 2));
        assert_eq!(root.at("xs").unwrap().len(), 2);
        assert_eq!(paths(&engine), vec!["state.xs"]);
    }

    #[test]
    fn test_remove_field_records_path() {
        let (engine, _) = Engine::with_frame_queue(EngineConfig::default());
        let root = engine.wrap(Value::from(json!({"a": 1})));

        assert!(root.remove("a").is_some());
        assert!(root.remove("a").is_none());
        assert_eq!(paths(&engine), vec!["state.a"]);
    }
}
