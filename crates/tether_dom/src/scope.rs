//! Render scope and expression evaluation
//!
//! A [`Scope`] carries the roots an expression may name. `state` and `el`
//! are always available; `item`, `index`, `event` and `detail` only when the
//! scope provides them. Any other root name falls through to state, so
//! `user.name` and `state.user.name` read the same thing.
//!
//! State and item reads go through the tracked reader, so evaluating a
//! binding during a render registers its dependencies.

use std::sync::Arc;

use tether_core::path;
use tether_core::{Key, Opaque, Reader, Tracked, Value};

use crate::expr::{Expr, Literal};
use crate::tree::{Document, NodeId};

/// Named roots available to binding expressions
#[derive(Clone, Debug)]
pub struct Scope {
    pub state: Reader,
    pub item: Option<Tracked>,
    pub index: Option<usize>,
    pub event: Option<Value>,
    pub detail: Option<Value>,
}

impl Scope {
    pub fn new(state: Reader) -> Self {
        Self {
            state,
            item: None,
            index: None,
            event: None,
            detail: None,
        }
    }

    /// Extend with a list item and its index
    pub fn with_item(&self, item: Tracked, index: usize) -> Self {
        Self {
            item: Some(item),
            index: Some(index),
            ..self.clone()
        }
    }

    pub fn with_event(mut self, event: Value) -> Self {
        self.event = Some(event);
        self
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Evaluate an expression for `element`
    pub fn eval(&self, expr: &Expr, doc: &Document, element: NodeId) -> Tracked {
        match expr {
            Expr::Literal(literal) => Tracked::Leaf(literal_value(literal)),
            Expr::Path(segments) => self.resolve(segments, doc, element),
            Expr::Not(operand) => {
                Tracked::Leaf(Value::Bool(!self.eval(operand, doc, element).is_truthy()))
            }
            Expr::Equals { lhs, rhs, negate } => {
                let lhs = self.eval(lhs, doc, element).into_value();
                let rhs = self.eval(rhs, doc, element).into_value();
                Tracked::Leaf(Value::Bool(lhs.same(&rhs) != *negate))
            }
            Expr::And(lhs, rhs) => {
                let lhs = self.eval(lhs, doc, element);
                if lhs.is_truthy() {
                    self.eval(rhs, doc, element)
                } else {
                    lhs
                }
            }
            Expr::Or(lhs, rhs) => {
                let lhs = self.eval(lhs, doc, element);
                if lhs.is_truthy() {
                    lhs
                } else {
                    self.eval(rhs, doc, element)
                }
            }
        }
    }

    /// Evaluate to a plain value
    pub fn value(&self, expr: &Expr, doc: &Document, element: NodeId) -> Value {
        self.eval(expr, doc, element).into_value()
    }

    fn resolve(&self, segments: &[Arc<str>], doc: &Document, element: NodeId) -> Tracked {
        let Some((root, rest)) = segments.split_first() else {
            return Tracked::Leaf(Value::Null);
        };

        match root.as_ref() {
            "state" => walk(Tracked::Node(self.state.clone()), rest),
            "el" => Tracked::Leaf(element_property(doc, element, rest)),
            "item" if self.item.is_some() => match &self.item {
                Some(item) => walk(item.clone(), rest),
                None => Tracked::Leaf(Value::Null),
            },
            "index" if self.index.is_some() => match (self.index, rest.is_empty()) {
                (Some(index), true) => Tracked::Leaf(Value::from(index)),
                _ => Tracked::Leaf(Value::Null),
            },
            "event" if self.event.is_some() => walk_value(self.event.as_ref(), rest),
            "detail" if self.detail.is_some() => walk_value(self.detail.as_ref(), rest),
            _ => walk(Tracked::Node(self.state.clone()), segments),
        }
    }
}

/// Follow segments through tracked readers
fn walk(start: Tracked, segments: &[Arc<str>]) -> Tracked {
    let mut current = start;
    for segment in segments {
        current = match current {
            Tracked::Node(reader) => reader.get(Key::from(segment.as_ref())),
            Tracked::Leaf(_) => return Tracked::Leaf(Value::Null),
        };
    }
    current
}

/// Follow segments through an untracked value
fn walk_value(start: Option<&Value>, segments: &[Arc<str>]) -> Tracked {
    let Some(start) = start else {
        return Tracked::Leaf(Value::Null);
    };
    let mut current = start.clone();
    for segment in segments {
        match current.child(&Key::from(segment.as_ref())) {
            Some(next) => current = next,
            None => return Tracked::Leaf(Value::Null),
        }
    }
    Tracked::Leaf(current)
}

/// `el`, `el.value`, `el.checked`, `el.tag`, or any attribute
fn element_property(doc: &Document, element: NodeId, rest: &[Arc<str>]) -> Value {
    let Some(property) = rest.first() else {
        return Value::Opaque(Opaque::new(element));
    };
    if rest.len() > 1 {
        return Value::Null;
    }
    match property.as_ref() {
        "value" => Value::from(doc.value(element)),
        "checked" => Value::Bool(doc.checked(element)),
        "tag" | "tagName" => Value::from(doc.tag(element).unwrap_or_default()),
        name => doc
            .attr(element, name)
            .map(Value::from)
            .or_else(|| doc.arg(element, name).cloned())
            .unwrap_or_default(),
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Bool(b) => Value::Bool(*b),
        Literal::Number(n) => Value::Number(*n),
        Literal::Str(s) => Value::from(s.as_ref()),
    }
}

/// Where a write-back expression assigns to
///
/// Returns `None` for expressions that are not plain state or item paths.
/// Item paths are returned relative to the item (`item.done` gives `done`).
pub fn assignable_path(expr: &Expr, has_item: bool) -> Option<(AssignTarget, String)> {
    let Expr::Path(segments) = expr else {
        return None;
    };
    let (root, rest) = segments.split_first()?;
    let join = |parts: &[Arc<str>]| {
        parts
            .iter()
            .fold(String::new(), |acc, part| path::join(&acc, part))
    };
    match root.as_ref() {
        "state" => (!rest.is_empty()).then(|| (AssignTarget::State, join(rest))),
        "item" if has_item => (!rest.is_empty()).then(|| (AssignTarget::Item, join(rest))),
        "index" if has_item => None,
        "el" => None,
        _ => Some((AssignTarget::State, join(segments))),
    }
}

/// Container a write-back path is relative to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AssignTarget {
    State,
    Item,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::compile;
    use serde_json::json;
    use tether_core::{Engine, EngineConfig};

    fn setup(state: serde_json::Value) -> (Engine, Document, NodeId) {
        let (engine, _) = Engine::with_frame_queue(EngineConfig::default());
        engine.wrap(Value::from(state));
        let doc = Document::parse_fragment(r#"<input type="text" value="typed" title="t">"#).unwrap();
        let input = doc.query_tag(doc.root(), "input")[0];
        (engine, doc, input)
    }

    fn eval(scope: &Scope, doc: &Document, node: NodeId, source: &str) -> Value {
        scope.value(&compile(source).unwrap(), doc, node)
    }

    #[test]
    fn test_state_roots_and_fallthrough() {
        let (engine, doc, node) = setup(json!({"user": {"name": "ada"}}));
        let (reader, log) = engine.track();
        let scope = Scope::new(reader);

        assert_eq!(eval(&scope, &doc, node, "state.user.name").as_str(), Some("ada"));
        assert_eq!(eval(&scope, &doc, node, "user.name").as_str(), Some("ada"));
        assert!(eval(&scope, &doc, node, "user.missing.deep").is_null());
        // `item` is not in scope, so it is a state key
        assert!(eval(&scope, &doc, node, "item.x").is_null());
        assert!(log.contains("user.name"));
        assert!(log.contains("item"));
    }

    #[test]
    fn test_item_index_and_element() {
        let (engine, doc, node) = setup(json!({"todos": [{"title": "a"}, {"title": "b"}]}));
        let (reader, log) = engine.track();
        let items = reader.get("todos").as_reader().unwrap().items();
        let scope = Scope::new(reader).with_item(items[1].clone(), 1);

        assert_eq!(eval(&scope, &doc, node, "item.title").as_str(), Some("b"));
        assert_eq!(eval(&scope, &doc, node, "index").as_f64(), Some(1.0));
        assert_eq!(eval(&scope, &doc, node, "el.value").as_str(), Some("typed"));
        assert_eq!(eval(&scope, &doc, node, "el.title").as_str(), Some("t"));
        assert!(log.contains("todos.1.title"));
    }

    #[test]
    fn test_operators() {
        let (engine, doc, node) = setup(json!({"n": 0, "s": "x", "flag": true}));
        let (reader, _) = engine.track();
        let scope = Scope::new(reader).with_event(Value::from(json!({"key": "Enter"})));

        assert_eq!(eval(&scope, &doc, node, "!n").as_bool(), Some(true));
        assert_eq!(eval(&scope, &doc, node, "s === 'x'").as_bool(), Some(true));
        assert_eq!(eval(&scope, &doc, node, "s != 'x'").as_bool(), Some(false));
        assert_eq!(eval(&scope, &doc, node, "n || 'fallback'").as_str(), Some("fallback"));
        assert_eq!(eval(&scope, &doc, node, "flag && s").as_str(), Some("x"));
        assert_eq!(eval(&scope, &doc, node, "event.key === 'Enter'").as_bool(), Some(true));
    }

    #[test]
    fn test_assignable_paths() {
        let target = |source: &str, has_item| assignable_path(&compile(source).unwrap(), has_item);
        assert_eq!(target("state.a.b", false), Some((AssignTarget::State, "a.b".into())));
        assert_eq!(target("a.b", false), Some((AssignTarget::State, "a.b".into())));
        assert_eq!(target("item.done", true), Some((AssignTarget::Item, "done".into())));
        assert_eq!(target("item.done", false), Some((AssignTarget::State, "item.done".into())));
        assert_eq!(target("!a", false), None);
        assert_eq!(target("el.value", false), None);
    }
}
