//! Self-describing value model for application state
//!
//! State graphs are not known at compile time, so the engine works over a
//! tagged variant instead of generated per-type code:
//!
//! - **Scalars**: `Null`, `Bool`, `Number`, `String`
//! - **Containers**: [`Record`] (insertion-ordered map) and [`Sequence`]
//!   (ordered list). Both are shared handles with identity, so the same
//!   container can be reachable from several places in the graph.
//! - **Opaque**: arbitrary host payloads (handles, contexts, resources) that
//!   the engine never instruments.
//!
//! `Null` doubles as the "absent" value: resolving a missing key yields it.

use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// Identity of a shared container (pointer address of its allocation)
///
/// Only meaningful while the container is alive; pair it with a weak handle
/// when it needs to outlive a borrow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(usize);

/// A key into a container: a record field name or a sequence index
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Key {
    Name(String),
    Index(usize),
}

impl Key {
    /// The key as a dotted-path segment
    pub fn segment(&self) -> String {
        match self {
            Key::Name(name) => name.clone(),
            Key::Index(index) => index.to_string(),
        }
    }

    /// Interpret the key as a sequence index
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(index) => Some(*index),
            Key::Name(name) => name.parse().ok(),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name)
    }
}

impl From<&String> for Key {
    fn from(name: &String) -> Self {
        Key::Name(name.clone())
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(name) => write!(f, "{}", name),
            Key::Index(index) => write!(f, "{}", index),
        }
    }
}

// =============================================================================
// CONTAINERS
// =============================================================================

/// Shared, insertion-ordered key/value record
#[derive(Clone, Default)]
pub struct Record(Rc<RefCell<IndexMap<String, Value>>>);

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> ContainerId {
        ContainerId(Rc::as_ptr(&self.0) as *const () as usize)
    }

    pub fn ptr_eq(&self, other: &Record) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakContainer {
        WeakContainer::Record(Rc::downgrade(&self.0))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.borrow().get(key).cloned()
    }

    /// Insert a field, returning the previous value
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.borrow_mut().insert(key.into(), value.into())
    }

    /// Remove a field, keeping the order of the remaining fields
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.borrow_mut().shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    /// Snapshot of the fields (values are shared handles, not deep copies)
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id())
            .field("keys", &self.keys())
            .finish()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Record {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let map = iter
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<IndexMap<_, _>>();
        Record(Rc::new(RefCell::new(map)))
    }
}

/// Shared ordered sequence
#[derive(Clone, Default)]
pub struct Sequence(Rc<RefCell<Vec<Value>>>);

impl Sequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> ContainerId {
        ContainerId(Rc::as_ptr(&self.0) as *const () as usize)
    }

    pub fn ptr_eq(&self, other: &Sequence) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn downgrade(&self) -> WeakContainer {
        WeakContainer::Sequence(Rc::downgrade(&self.0))
    }

    pub fn get(&self, index: usize) -> Option<Value> {
        self.0.borrow().get(index).cloned()
    }

    /// Set an element, padding with `Null` when writing past the end
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Option<Value> {
        let mut items = self.0.borrow_mut();
        if index >= items.len() {
            items.resize(index, Value::Null);
            items.push(value.into());
            None
        } else {
            Some(std::mem::replace(&mut items[index], value.into()))
        }
    }

    pub fn push(&self, value: impl Into<Value>) {
        self.0.borrow_mut().push(value.into());
    }

    /// Insert at `index`, clamped to the current length
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        let mut items = self.0.borrow_mut();
        let index = index.min(items.len());
        items.insert(index, value.into());
    }

    pub fn remove(&self, index: usize) -> Option<Value> {
        let mut items = self.0.borrow_mut();
        (index < items.len()).then(|| items.remove(index))
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    /// Replace the whole contents, keeping the sequence identity
    pub fn replace(&self, values: Vec<Value>) {
        *self.0.borrow_mut() = values;
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequence")
            .field("id", &self.id())
            .field("len", &self.len())
            .finish()
    }
}

impl<V: Into<Value>> FromIterator<V> for Sequence {
    fn from_iter<I: IntoIterator<Item = V>>(iter: I) -> Self {
        let items = iter.into_iter().map(Into::into).collect();
        Sequence(Rc::new(RefCell::new(items)))
    }
}

/// Non-owning handle to a container, used by identity marks
#[derive(Clone)]
pub enum WeakContainer {
    Record(Weak<RefCell<IndexMap<String, Value>>>),
    Sequence(Weak<RefCell<Vec<Value>>>),
}

impl WeakContainer {
    pub fn upgrade(&self) -> Option<Value> {
        match self {
            WeakContainer::Record(weak) => weak.upgrade().map(|rc| Value::Record(Record(rc))),
            WeakContainer::Sequence(weak) => weak.upgrade().map(|rc| Value::Sequence(Sequence(rc))),
        }
    }

    pub fn is_alive(&self) -> bool {
        match self {
            WeakContainer::Record(weak) => weak.strong_count() > 0,
            WeakContainer::Sequence(weak) => weak.strong_count() > 0,
        }
    }
}

/// Host payload the engine never looks inside
#[derive(Clone)]
pub struct Opaque(Rc<dyn Any>);

impl Opaque {
    pub fn new<T: Any>(payload: T) -> Self {
        Opaque(Rc::new(payload))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Opaque) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Opaque(..)")
    }
}

// =============================================================================
// VALUE
// =============================================================================

/// A node of the state graph
#[derive(Clone, Debug, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Record(Record),
    Sequence(Sequence),
    Opaque(Opaque),
}

impl Value {
    /// Identity comparison with `===` semantics
    ///
    /// Containers and opaque payloads compare by pointer, scalars by value.
    /// `NaN` is never the same as itself.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Record(a), Value::Record(b)) => a.ptr_eq(b),
            (Value::Sequence(a), Value::Sequence(b)) => a.ptr_eq(b),
            (Value::Opaque(a), Value::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    /// Boolean coercion used by visibility, class and checked bindings
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Record(_) | Value::Sequence(_) | Value::Opaque(_) => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Identity of the container, if this value is one
    pub fn container_id(&self) -> Option<ContainerId> {
        match self {
            Value::Record(record) => Some(record.id()),
            Value::Sequence(sequence) => Some(sequence.id()),
            _ => None,
        }
    }

    /// Weak handle to the container, if this value is one
    pub fn downgrade(&self) -> Option<WeakContainer> {
        match self {
            Value::Record(record) => Some(record.downgrade()),
            Value::Sequence(sequence) => Some(sequence.downgrade()),
            _ => None,
        }
    }

    /// Read a child by key. Scalars and missing keys yield `None`.
    pub fn child(&self, key: &Key) -> Option<Value> {
        match (self, key) {
            (Value::Record(record), key) => record.get(&key.segment()),
            (Value::Sequence(sequence), key) => sequence.get(key.as_index()?),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&Sequence> {
        match self {
            Value::Sequence(sequence) => Some(sequence),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Record(_) => "record",
            Value::Sequence(_) => "sequence",
            Value::Opaque(_) => "opaque",
        }
    }

    /// Text rendering used by `data-text` and attribute mirroring
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.to_string(),
            Value::Sequence(sequence) => sequence
                .to_vec()
                .iter()
                .map(Value::to_text)
                .collect::<Vec<_>>()
                .join(","),
            Value::Record(_) => "[object Object]".to_string(),
            Value::Opaque(_) => "[opaque]".to_string(),
        }
    }

    /// Build a fresh graph from JSON
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.into()),
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(fields) => Value::Record(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    /// Snapshot as JSON for inspection
    ///
    /// Cycles are cut: a container already on the current traversal stack
    /// is emitted as `null`. Opaque payloads are emitted as `null` too.
    pub fn to_json(&self) -> serde_json::Value {
        let mut stack = FxHashSet::default();
        to_json_inner(self, &mut stack)
    }
}

fn to_json_inner(value: &Value, stack: &mut FxHashSet<ContainerId>) -> serde_json::Value {
    if let Some(id) = value.container_id() {
        if !stack.insert(id) {
            return serde_json::Value::Null;
        }
    }

    let json = match value {
        Value::Null | Value::Opaque(_) => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        // Integral numbers come back as JSON integers
        Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 => {
            serde_json::Value::from(*n as i64)
        }
        Value::Number(n) => serde_json::Number::from_f64(*n)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::String(s) => serde_json::Value::String(s.to_string()),
        Value::Sequence(sequence) => serde_json::Value::Array(
            sequence
                .to_vec()
                .iter()
                .map(|item| to_json_inner(item, stack))
                .collect(),
        ),
        Value::Record(record) => serde_json::Value::Object(
            record
                .entries()
                .into_iter()
                .map(|(k, v)| (k, to_json_inner(&v, stack)))
                .collect(),
        ),
    };

    if let Some(id) = value.container_id() {
        stack.remove(&id);
    }
    json
}

/// Format a number the way markup expects (`3`, not `3.0`)
fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else {
        format!("{}", n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.into())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s.into())
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Record(record)
    }
}

impl From<Sequence> for Value {
    fn from(sequence: Sequence) -> Self {
        Value::Sequence(sequence)
    }
}

impl From<Opaque> for Value {
    fn from(opaque: Opaque) -> Self {
        Value::Opaque(opaque)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        Value::from_json(json)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_same_is_identity_for_containers() {
        let a = Value::from(json!({"x": 1}));
        let b = Value::from(json!({"x": 1}));
        assert!(a.same(&a.clone()));
        assert!(!a.same(&b));
    }

    #[test]
    fn test_same_is_value_for_scalars() {
        assert!(Value::from("hi").same(&Value::from("hi".to_string())));
        assert!(Value::from(2).same(&Value::from(2.0)));
        assert!(!Value::Number(f64::NAN).same(&Value::Number(f64::NAN)));
        assert!(!Value::from(1).same(&Value::from("1")));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(Value::from("a").is_truthy());
        assert!(Value::from(json!([])).is_truthy());
    }

    #[test]
    fn test_to_text() {
        assert_eq!(Value::from(3).to_text(), "3");
        assert_eq!(Value::from(2.5).to_text(), "2.5");
        assert_eq!(Value::Null.to_text(), "");
        assert_eq!(Value::from(json!(["a", 1, true])).to_text(), "a,1,true");
    }

    #[test]
    fn test_json_snapshot_cuts_cycles() {
        let root = Record::new();
        root.insert("name", "root");
        root.insert("me", root.clone());
        let json = Value::Record(root).to_json();
        assert_eq!(json, json!({"name": "root", "me": null}));
    }

    #[test]
    fn test_json_snapshot_keeps_integers() {
        let value = Value::from(json!({"n": 5, "half": 0.5}));
        assert_eq!(value.to_json(), json!({"n": 5, "half": 0.5}));
    }

    #[test]
    fn test_sequence_set_pads() {
        let seq = Sequence::new();
        seq.set(2, "c");
        assert_eq!(seq.len(), 3);
        assert!(seq.get(0).is_some_and(|v| v.is_null()));
    }

    #[test]
    fn test_weak_container_dies_with_owner() {
        let record = Record::new();
        let weak = record.downgrade();
        assert!(weak.is_alive());
        drop(record);
        assert!(!weak.is_alive());
        assert!(weak.upgrade().is_none());
    }
}
