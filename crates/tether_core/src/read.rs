//! Dependency-tracking read accessor
//!
//! A [`Reader`] is built fresh for every render invocation. Each property
//! read through it appends the read's path, relative to the state root, to
//! the render's [`AccessLog`]. Reads of containers return nested readers so
//! deep reads are tracked transitively; scalar reads end the chain.
//!
//! Writes through a reader are rejected: they are reported and discarded.

use indexmap::IndexSet;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

use crate::classify::is_plain;
use crate::engine::EngineInner;
use crate::error::Fault;
use crate::path;
use crate::value::{ContainerId, Key, Value};

#[derive(Default)]
struct LogInner {
    paths: IndexSet<String>,
    /// Path each container was first reached at during this render
    visited: FxHashMap<ContainerId, String>,
}

/// Paths read during one render, in first-read order
#[derive(Clone, Default)]
pub struct AccessLog {
    inner: Rc<RefCell<LogInner>>,
}

impl AccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, path: &str) {
        let mut inner = self.inner.borrow_mut();
        if !inner.paths.contains(path) {
            tracing::trace!(path, "state read tracked");
            inner.paths.insert(path.to_string());
        }
    }

    /// Fix a container's path on its first visit and return it
    fn visit(&self, id: ContainerId, path: String) -> String {
        self.inner
            .borrow_mut()
            .visited
            .entry(id)
            .or_insert(path)
            .clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.inner.borrow().paths.iter().cloned().collect()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.inner.borrow().paths.contains(path)
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().paths.is_empty()
    }
}

impl std::fmt::Debug for AccessLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.inner.borrow().paths.iter()).finish()
    }
}

/// Result of a tracked read
#[derive(Clone, Debug)]
pub enum Tracked {
    /// A container, readable further
    Node(Reader),
    /// A scalar (or absent) value
    Leaf(Value),
}

impl Tracked {
    /// The underlying value (containers are shared, not copied)
    pub fn value(&self) -> Value {
        match self {
            Tracked::Node(reader) => reader.value(),
            Tracked::Leaf(value) => value.clone(),
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Tracked::Node(reader) => reader.target,
            Tracked::Leaf(value) => value,
        }
    }

    pub fn as_reader(&self) -> Option<&Reader> {
        match self {
            Tracked::Node(reader) => Some(reader),
            Tracked::Leaf(_) => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Tracked::Node(_) => true,
            Tracked::Leaf(value) => value.is_truthy(),
        }
    }

    pub fn to_text(&self) -> String {
        self.value().to_text()
    }
}

/// Read accessor for one container
#[derive(Clone)]
pub struct Reader {
    target: Value,
    /// Path relative to the state root (empty for the root itself)
    path: String,
    log: AccessLog,
    engine: Rc<EngineInner>,
}

impl Reader {
    pub(crate) fn new(root: Value, log: AccessLog, engine: Rc<EngineInner>) -> Self {
        if let Some(id) = root.container_id() {
            log.visit(id, String::new());
        }
        Self {
            target: root,
            path: String::new(),
            log,
            engine,
        }
    }

    /// Relative path of this container
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The wrapped container, untracked
    pub fn value(&self) -> Value {
        self.target.clone()
    }

    pub fn log(&self) -> &AccessLog {
        &self.log
    }

    /// Read a child, logging its path
    pub fn get(&self, key: impl Into<Key>) -> Tracked {
        let key = key.into();
        let child_path = path::join(&self.path, &key.segment());
        self.log.record(&child_path);

        let child = self.target.child(&key).unwrap_or_default();
        self.wrap_child(child, child_path)
    }

    /// Read through a relative path, logging every step
    ///
    /// A scalar or missing intermediate yields `Null`.
    pub fn get_path(&self, relative: &str) -> Tracked {
        let mut current = Tracked::Node(self.clone());
        for key in path::segments(relative) {
            current = match current {
                Tracked::Node(reader) => reader.get(key),
                Tracked::Leaf(_) => return Tracked::Leaf(Value::Null),
            };
        }
        current
    }

    /// Number of fields or elements
    ///
    /// Logs the container's own path (the root's empty path is not logged).
    pub fn len(&self) -> usize {
        self.touch();
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
        self.touch();
        match &self.target {
            Value::Record(record) => record.keys(),
            Value::Sequence(sequence) => (0..sequence.len()).map(|i| i.to_string()).collect(),
            _ => Vec::new(),
        }
    }

    /// Every element of a sequence (or field value of a record), tracked
    pub fn items(&self) -> Vec<Tracked> {
        self.keys().into_iter().map(|key| self.get(key)).collect()
    }

    /// Rejected: render logic may not mutate state
    ///
    /// The attempt is reported as [`Fault::ReadOnlyWrite`]; state is left
    /// untouched and no change is recorded. Always returns `false`.
    pub fn set(&self, key: impl Into<Key>, _value: impl Into<Value>) -> bool {
        let key = key.into();
        let relative = path::join(&self.path, &key.segment());
        self.engine.diagnostics.report(Fault::ReadOnlyWrite {
            path: path::join(&self.engine.config.root_segment, &relative),
        });
        false
    }

    fn touch(&self) {
        if !self.path.is_empty() {
            self.log.record(&self.path);
        }
    }

    fn wrap_child(&self, child: Value, child_path: String) -> Tracked {
        if !is_plain(&child) {
            return Tracked::Leaf(child);
        }
        let path = match child.container_id() {
            Some(id) => self.log.visit(id, child_path),
            None => child_path,
        };
        Tracked::Node(Reader {
            target: child,
            path,
            log: self.log.clone(),
            engine: self.engine.clone(),
        })
    }
}

impl std::fmt::Debug for Reader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reader")
            .field("path", &self.path)
            .field("kind", &self.target.type_name())
            .finish()
    }
}
