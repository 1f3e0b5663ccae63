//! Identity marks for instrumented containers
//!
//! Records which containers the write accessor has already wrapped, and the
//! dotted path each was bound to at wrap time. Entries are keyed by
//! container identity, not by value, and hold only weak handles so that a
//! mark never keeps its container's contents alive.

use rustc_hash::FxHashMap;

use crate::value::{ContainerId, Value, WeakContainer};

/// Purge dead entries after this many insertions
const PURGE_INTERVAL: usize = 256;

struct Mark {
    node: WeakContainer,
    path: String,
}

#[derive(Default)]
pub struct Marks {
    entries: FxHashMap<ContainerId, Mark>,
    inserts_since_purge: usize,
}

impl Marks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a container with its wrap-time path
    ///
    /// Returns `false` if the container is already marked (its original
    /// path is kept) or is not a container.
    pub fn mark(&mut self, value: &Value, path: String) -> bool {
        let (Some(id), Some(node)) = (value.container_id(), value.downgrade()) else {
            return false;
        };
        if self.entries.get(&id).is_some_and(|mark| mark.node.is_alive()) {
            return false;
        }

        self.entries.insert(id, Mark { node, path });
        self.inserts_since_purge += 1;
        if self.inserts_since_purge >= PURGE_INTERVAL {
            self.purge();
        }
        true
    }

    /// The wrap-time path of a marked container
    pub fn path_of(&self, value: &Value) -> Option<&str> {
        let mark = self.entries.get(&value.container_id()?)?;
        mark.node.is_alive().then_some(mark.path.as_str())
    }

    pub fn is_marked(&self, value: &Value) -> bool {
        self.path_of(value).is_some()
    }

    /// Drop entries whose containers have been freed
    pub fn purge(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, mark| mark.node.is_alive());
        self.inserts_since_purge = 0;
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::trace!(removed, "purged dead container marks");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.inserts_since_purge = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Record;

    #[test]
    fn test_first_mark_wins() {
        let mut marks = Marks::new();
        let record = Value::Record(Record::new());

        assert!(marks.mark(&record, "state.a".into()));
        assert!(!marks.mark(&record, "state.b".into()));
        assert_eq!(marks.path_of(&record), Some("state.a"));
    }

    #[test]
    fn test_marks_do_not_keep_containers_alive() {
        let mut marks = Marks::new();
        let record = Record::new();
        record.insert("payload", "big");
        let weak = record.downgrade();

        marks.mark(&Value::Record(record), "state.x".into());
        assert!(!weak.is_alive());
        assert_eq!(marks.purge(), 1);
        assert!(marks.is_empty());
    }

    #[test]
    fn test_scalars_are_never_marked() {
        let mut marks = Marks::new();
        assert!(!marks.mark(&Value::from(1), "state.n".into()));
        assert!(!marks.is_marked(&Value::from(1)));
    }
}
