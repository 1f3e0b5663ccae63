//! Declarative binding engine
//!
//! [`Binder::apply_bindings`] runs once per render, after the component's
//! own render logic. It walks the component's subtree in tree order and
//! applies every directive it finds:
//!
//! | attribute | effect |
//! |---|---|
//! | `data-show` | `hidden` attribute removed when truthy, set when falsy |
//! | `data-text` | text content replaced |
//! | `data-class` | classes toggled (single expression or `name: expr` pairs) |
//! | `data-value` | form value property |
//! | `data-checked` | checked property |
//! | `data-attr-<name>` | attribute `<name>` mirrored |
//! | `data-arg-<name>` | value stored in the element's args |
//! | `data-list` | item template instantiated per sequence element |
//!
//! All tree writes are change-detected. Reads go through the scope's
//! tracked reader, so the render subscribes to exactly what its bindings
//! used.
//!
//! The walk does not descend into nested component hosts (custom elements,
//! tags containing `-`): they own their subtree. Their `data-arg-*` values
//! are still evaluated, which is how a parent feeds a child.
//!
//! A binding that cannot be compiled or applied is reported once per binder
//! and otherwise does nothing.

use indexmap::IndexSet;
use rustc_hash::FxHashSet;
use std::cell::RefCell;
use std::sync::Arc;

use tether_core::{Diagnostics, Fault, Tracked, Value, Writer};

use crate::attrs;
use crate::expr::{ClassSpec, Expr, ExpressionCache};
use crate::scope::{assignable_path, AssignTarget, Scope};
use crate::tree::{Document, ItemScope, NodeId};

/// What one [`Binder::apply_bindings`] pass changed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BindReport {
    /// Elements visited
    pub elements: usize,
    /// Tree writes made (text, attributes, classes, properties)
    pub updates: usize,
    /// Lists rebuilt
    pub lists_rebuilt: usize,
    /// List instances created
    pub instances_created: usize,
    /// Elements whose `data-arg-*` values changed
    pub args_changed: Vec<NodeId>,
    /// Bindings skipped as invalid
    pub invalid: usize,
}

impl BindReport {
    fn merge_arg(&mut self, node: NodeId) {
        if !self.args_changed.contains(&node) {
            self.args_changed.push(node);
        }
    }
}

/// Whether a tag names a component host (a custom element)
pub fn is_component_host(tag: &str) -> bool {
    tag.contains('-')
}

pub struct Binder {
    cache: Arc<ExpressionCache>,
    diagnostics: Diagnostics,
    reported: RefCell<FxHashSet<(String, String)>>,
}

impl Binder {
    /// Binder sharing the process-wide expression cache
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self::with_cache(ExpressionCache::global(), diagnostics)
    }

    pub fn with_cache(cache: Arc<ExpressionCache>, diagnostics: Diagnostics) -> Self {
        Self {
            cache,
            diagnostics,
            reported: RefCell::new(FxHashSet::default()),
        }
    }

    pub fn cache(&self) -> &ExpressionCache {
        &self.cache
    }

    /// Apply every binding in the subtree rooted at `root`
    pub fn apply_bindings(&self, doc: &mut Document, root: NodeId, scope: &Scope) -> BindReport {
        let mut report = BindReport::default();
        self.bind_subtree(doc, root, root, scope, false, &mut report);
        tracing::trace!(
            elements = report.elements,
            updates = report.updates,
            lists = report.lists_rebuilt,
            "bindings applied"
        );
        report
    }

    fn bind_subtree(
        &self,
        doc: &mut Document,
        node: NodeId,
        root: NodeId,
        scope: &Scope,
        in_list: bool,
        report: &mut BindReport,
    ) {
        let Some(tag) = doc.tag(node) else {
            return;
        };
        if tag == attrs::TEMPLATE_TAG {
            return;
        }
        let nested_host = node != root && is_component_host(tag);

        report.elements += 1;
        if nested_host {
            self.bind_args(doc, node, scope, report);
            return;
        }
        self.bind_element(doc, node, scope, report);

        if let Some(source) = doc.attr(node, attrs::LIST).map(String::from) {
            if in_list {
                self.invalid(attrs::LIST, &source, "nested list bindings are not supported", report);
                return;
            }
            self.bind_list(doc, node, &source, scope, report);
            return;
        }

        for child in doc.child_elements(node) {
            self.bind_subtree(doc, child, root, scope, in_list, report);
        }
    }

    // =========================================================================
    // ELEMENT DIRECTIVES
    // =========================================================================

    fn bind_element(&self, doc: &mut Document, node: NodeId, scope: &Scope, report: &mut BindReport) {
        let directives: Vec<(String, String)> = match doc.element(node) {
            Some(element) => element
                .attrs
                .iter()
                .filter(|(name, _)| attrs::is_directive(name))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            None => return,
        };

        // Fixed directive order, then the attribute families in markup order
        for directive in [attrs::SHOW, attrs::TEXT, attrs::CLASS, attrs::VALUE, attrs::CHECKED] {
            let Some((_, source)) = directives.iter().find(|(name, _)| name == directive) else {
                continue;
            };
            match directive {
                attrs::CLASS => self.bind_class(doc, node, source, scope, report),
                _ => {
                    let Some(expr) = self.expression(directive, source, report) else {
                        continue;
                    };
                    let value = scope.value(&expr, doc, node);
                    let changed = match directive {
                        attrs::SHOW => {
                            if value.is_truthy() {
                                doc.remove_attr(node, attrs::HIDDEN)
                            } else {
                                doc.set_attr(node, attrs::HIDDEN, "")
                            }
                        }
                        attrs::TEXT => doc.set_text_content(node, &value.to_text()),
                        attrs::VALUE => doc.set_value(node, &value.to_text()),
                        _ => doc.set_checked(node, value.is_truthy()),
                    };
                    if changed {
                        report.updates += 1;
                    }
                }
            }
        }

        for (name, source) in &directives {
            let Some(target) = name.strip_prefix(attrs::ATTR_PREFIX) else {
                continue;
            };
            let Some(expr) = self.expression(name, source, report) else {
                continue;
            };
            let changed = match scope.value(&expr, doc, node) {
                Value::Null | Value::Bool(false) => doc.remove_attr(node, target),
                Value::Bool(true) => doc.set_attr(node, target, ""),
                value => doc.set_attr(node, target, &value.to_text()),
            };
            if changed {
                report.updates += 1;
            }
        }

        self.bind_args(doc, node, scope, report);
    }

    fn bind_args(&self, doc: &mut Document, node: NodeId, scope: &Scope, report: &mut BindReport) {
        let args: Vec<(String, String)> = match doc.element(node) {
            Some(element) => element
                .attrs
                .iter()
                .filter_map(|(name, value)| {
                    name.strip_prefix(attrs::ARG_PREFIX)
                        .map(|arg| (arg.to_string(), value.clone()))
                })
                .collect(),
            None => return,
        };

        for (arg, source) in args {
            let attribute = format!("{}{}", attrs::ARG_PREFIX, arg);
            let Some(expr) = self.expression(&attribute, &source, report) else {
                continue;
            };
            let value = scope.value(&expr, doc, node);
            if doc.set_arg(node, &arg, value) {
                report.merge_arg(node);
            }
        }
    }

    fn bind_class(
        &self,
        doc: &mut Document,
        node: NodeId,
        source: &str,
        scope: &Scope,
        report: &mut BindReport,
    ) {
        let compiled = self.cache.class_spec(source);
        let spec = match &*compiled {
            Ok(spec) => spec,
            Err(err) => {
                self.invalid(attrs::CLASS, source, &err.to_string(), report);
                return;
            }
        };

        match spec {
            ClassSpec::Pairs(pairs) => {
                for (name, expr) in pairs {
                    let on = scope.eval(expr, doc, node).is_truthy();
                    if doc.toggle_class(node, name, on) {
                        report.updates += 1;
                    }
                }
            }
            ClassSpec::Single(expr) => {
                let wanted = class_names(&scope.value(expr, doc, node));
                let previous = doc
                    .element(node)
                    .map(|e| e.bound_classes.clone())
                    .unwrap_or_default();

                for stale in previous.difference(&wanted) {
                    if doc.toggle_class(node, stale, false) {
                        report.updates += 1;
                    }
                }
                for name in &wanted {
                    if doc.toggle_class(node, name, true) {
                        report.updates += 1;
                    }
                }
                if let Some(element) = doc.element_mut(node) {
                    element.bound_classes = wanted;
                }
            }
        }
    }

    // =========================================================================
    // LISTS
    // =========================================================================

    /// Drop the previous instances and build one per item
    fn bind_list(
        &self,
        doc: &mut Document,
        node: NodeId,
        source: &str,
        scope: &Scope,
        report: &mut BindReport,
    ) {
        let once = doc.has_attr(node, attrs::LIST_ONCE) || doc.has_attr(node, attrs::LIST_STATIC);
        if once && doc.element(node).is_some_and(|e| e.list_rendered) {
            return;
        }

        let Some(template) = doc
            .child_elements(node)
            .into_iter()
            .find(|child| doc.is_item_template(*child))
        else {
            self.invalid(attrs::LIST, source, "missing <template data-item>", report);
            return;
        };
        let Some(expr) = self.expression(attrs::LIST, source, report) else {
            return;
        };
        let key_expr = match doc.attr(node, attrs::LIST_KEY).map(String::from) {
            Some(key_source) => self.expression(attrs::LIST_KEY, &key_source, report),
            None => None,
        };

        let items = match scope.eval(&expr, doc, node) {
            Tracked::Node(reader) if reader.value().as_sequence().is_some() => reader.items(),
            _ => Vec::new(),
        };

        let previous = doc
            .element_mut(node)
            .map(|e| std::mem::take(&mut e.list_instances))
            .unwrap_or_default();
        for instance in previous {
            doc.remove(instance);
        }

        let prototype = doc.children(template).to_vec();
        let mut instances = Vec::with_capacity(items.len() * prototype.len());
        for (index, item) in items.into_iter().enumerate() {
            let item_scope = scope.with_item(item.clone(), index);
            for part in &prototype {
                let Some(clone) = doc.clone_subtree(*part) else {
                    continue;
                };
                if let Some(element) = doc.element_mut(clone) {
                    element.item_scope = Some(ItemScope {
                        item: item.value(),
                        index,
                    });
                }
                if let Some(key_expr) = &key_expr {
                    if doc.is_element(clone) {
                        let key = item_scope.value(key_expr, doc, clone).to_text();
                        doc.set_attr(clone, attrs::KEY, &key);
                    }
                }
                // Bound before insertion
                self.bind_subtree(doc, clone, node, &item_scope, true, report);
                doc.append_child(node, clone);
                instances.push(clone);
            }
        }

        tracing::debug!(source, instances = instances.len(), "list rebuilt");
        report.lists_rebuilt += 1;
        report.instances_created += instances.len();
        if let Some(element) = doc.element_mut(node) {
            element.list_instances = instances;
            element.list_rendered = true;
        }
    }

    // =========================================================================
    // WRITE-BACK
    // =========================================================================

    /// Push a form control's current value back into state
    ///
    /// Uses `data-checked` for checkboxes and radios and `data-value`
    /// otherwise. Numeric inputs (`type=number|range`) write numbers. Inside a
    /// list instance, `item.*` paths write into the instance's item. Returns
    /// `true` if state changed.
    pub fn write_back(&self, doc: &Document, node: NodeId, state: &Writer) -> bool {
        let input_type = doc.attr(node, "type").unwrap_or("text").to_ascii_lowercase();
        let checkable = matches!(input_type.as_str(), "checkbox" | "radio");

        let (attribute, source, value) =
            match (doc.attr(node, attrs::CHECKED), doc.attr(node, attrs::VALUE)) {
                (Some(source), _) if checkable => {
                    (attrs::CHECKED, source, Value::Bool(doc.checked(node)))
                }
                (_, Some(source)) => {
                    let raw = doc.value(node);
                    let value = if matches!(input_type.as_str(), "number" | "range") {
                        raw.trim().parse::<f64>().map(Value::Number).unwrap_or(Value::Null)
                    } else {
                        Value::from(raw)
                    };
                    (attrs::VALUE, source, value)
                }
                _ => return false,
            };

        let mut report = BindReport::default();
        let Some(expr) = self.expression(attribute, source, &mut report) else {
            return false;
        };
        let item_scope = doc.item_scope(node);
        let Some((target, path)) = assignable_path(&expr, item_scope.is_some()) else {
            self.diagnostics.report(Fault::InvalidBinding {
                attribute: attribute.to_string(),
                expression: source.to_string(),
                reason: "expression is not assignable".to_string(),
            });
            return false;
        };

        let writer = match (target, item_scope) {
            (AssignTarget::State, _) => state.clone(),
            (AssignTarget::Item, Some(scope)) => match state.for_container(&scope.item) {
                Some(writer) => writer,
                None => {
                    self.diagnostics.report(Fault::IgnoredWrite {
                        path: format!("item.{}", path),
                        reason: format!("item is a {}, not a container", scope.item.type_name()),
                    });
                    return false;
                }
            },
            (AssignTarget::Item, None) => return false,
        };

        tracing::trace!(attribute, path = %path, "form write-back");
        writer.set_path(&path, value)
    }

    // =========================================================================
    // HELPERS
    // =========================================================================

    fn expression(&self, attribute: &str, source: &str, report: &mut BindReport) -> Option<Expr> {
        let compiled = self.cache.expression(source);
        match &*compiled {
            Ok(expr) => Some(expr.clone()),
            Err(err) => {
                self.invalid(attribute, source, &err.to_string(), report);
                None
            }
        }
    }

    fn invalid(&self, attribute: &str, source: &str, reason: &str, report: &mut BindReport) {
        report.invalid += 1;
        let first = self
            .reported
            .borrow_mut()
            .insert((attribute.to_string(), source.to_string()));
        if first {
            self.diagnostics.report(Fault::InvalidBinding {
                attribute: attribute.to_string(),
                expression: source.to_string(),
                reason: reason.to_string(),
            });
        }
    }
}

impl std::fmt::Debug for Binder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binder").field("cache", &self.cache).finish()
    }
}

/// Class names produced by a single-expression class binding
fn class_names(value: &Value) -> IndexSet<String> {
    match value {
        Value::String(classes) => classes.split_whitespace().map(String::from).collect(),
        Value::Sequence(names) => names
            .to_vec()
            .iter()
            .map(Value::to_text)
            .filter(|name| !name.is_empty())
            .collect(),
        Value::Record(flags) => flags
            .entries()
            .into_iter()
            .filter(|(_, on)| on.is_truthy())
            .map(|(name, _)| name)
            .collect(),
        _ => IndexSet::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::rc::Rc;
    use tether_core::{AccessLog, Engine, EngineConfig, FrameQueue};

    struct Fixture {
        engine: Engine,
        frames: Rc<FrameQueue>,
        state: Writer,
        doc: Document,
        binder: Binder,
    }

    impl Fixture {
        fn new(state: serde_json::Value, markup: &str) -> Self {
            let (engine, frames) = Engine::with_frame_queue(EngineConfig::default());
            let state = engine.wrap(Value::from(state));
            let binder = Binder::with_cache(
                Arc::new(ExpressionCache::new()),
                engine.diagnostics().clone(),
            );
            Self {
                engine,
                frames,
                state,
                doc: Document::parse_fragment(markup).unwrap(),
                binder,
            }
        }

        fn bind(&mut self) -> (BindReport, AccessLog) {
            let (reader, log) = self.engine.track();
            let root = self.doc.root();
            let report = self.binder.apply_bindings(&mut self.doc, root, &Scope::new(reader));
            (report, log)
        }

        fn first(&self, tag: &str) -> NodeId {
            self.doc.query_tag(self.doc.root(), tag)[0]
        }
    }

    #[test]
    fn test_text_show_and_attr() {
        let mut fx = Fixture::new(
            json!({"name": "ada", "visible": false, "url": "/a"}),
            r#"<p data-text="name" data-show="visible"></p><a data-attr-href="url"></a>"#,
        );
        let (report, log) = fx.bind();

        assert_eq!(
            fx.doc.html(),
            r#"<p data-text="name" data-show="visible" hidden>ada</p><a data-attr-href="url" href="/a"></a>"#
        );
        assert_eq!(report.updates, 3);
        assert_eq!(log.paths(), vec!["visible", "name", "url"]);

        // Nothing changed: no tree writes
        let (report, _) = fx.bind();
        assert_eq!(report.updates, 0);
    }

    #[test]
    fn test_class_single_and_pairs() {
        let mut fx = Fixture::new(
            json!({"classes": {"a": true, "b": false}, "done": true}),
            r#"<div class="static" data-class="classes"></div><span data-class="done: done, 'is-open': !done"></span>"#,
        );
        fx.bind();
        let div = fx.first("div");
        let span = fx.first("span");
        assert_eq!(fx.doc.class_list(div), vec!["static", "a"]);
        assert_eq!(fx.doc.class_list(span), vec!["done"]);

        let classes = fx.state.at("classes").unwrap();
        classes.set("a", false);
        classes.set("b", true);
        fx.state.set("done", false);
        fx.bind();
        assert_eq!(fx.doc.class_list(div), vec!["static", "b"]);
        assert_eq!(fx.doc.class_list(span), vec!["is-open"]);
    }

    #[test]
    fn test_list_reconciliation() {
        let mut fx = Fixture::new(
            json!({"todos": [{"title": "a"}, {"title": "b"}, {"title": "c"}]}),
            r#"<ul data-list="todos" data-list-key="item.title"><template data-item><li data-text="item.title"></li></template></ul>"#,
        );
        let (report, log) = fx.bind();
        assert_eq!(report.instances_created, 3);
        assert!(log.contains("todos.2.title"));

        fx.state.at("todos").unwrap().remove_at(1);
        fx.bind();

        let ul = fx.first("ul");
        let items: Vec<NodeId> = fx.doc.query_tag(ul, "li").into_iter().filter(|li| fx.doc.parent(*li) == Some(ul)).collect();
        assert_eq!(items.len(), 2);
        assert_eq!(fx.doc.text_content(items[0]), "a");
        assert_eq!(fx.doc.text_content(items[1]), "c");
        assert_eq!(fx.doc.attr(items[1], "data-key"), Some("c"));
    }

    #[test]
    fn test_list_once_renders_once() {
        let mut fx = Fixture::new(
            json!({"tags": ["x", "y"]}),
            r#"<ul data-list="tags" data-list-once><template data-item><li data-text="item"></li></template></ul>"#,
        );
        fx.bind();
        fx.state.at("tags").unwrap().push("z");
        let (report, _) = fx.bind();
        assert_eq!(report.lists_rebuilt, 0);
        assert_eq!(fx.doc.text_content(fx.first("ul")), "xy");
    }

    #[test]
    fn test_invalid_lists_are_reported_and_skipped() {
        let mut fx = Fixture::new(
            json!({"rows": [[1], [2]], "other": []}),
            r#"<ol data-list="other"><li></li></ol><ul data-list="rows"><template data-item><li><ul data-list="item"><template data-item><b></b></template></ul></li></template></ul>"#,
        );
        let (report, _) = fx.bind();
        assert_eq!(report.invalid, 3);

        // The template prototype plus one copy per row, none of them expanded
        let nested: Vec<NodeId> = fx
            .doc
            .query_attr(fx.doc.root(), "data-list")
            .into_iter()
            .filter(|n| fx.doc.attr(*n, "data-list") == Some("item"))
            .collect();
        assert_eq!(nested.len(), 3);
        assert!(nested.iter().all(|n| fx.doc.child_elements(*n).len() == 1));

        let faults = fx.engine.diagnostics().recent();
        assert_eq!(faults.len(), 2);
        assert!(faults.iter().all(|f| matches!(f, Fault::InvalidBinding { .. })));
    }

    #[test]
    fn test_expression_cache_reuse_across_rebuilds() {
        let todos: Vec<serde_json::Value> = (0..100)
            .map(|i| json!({"title": format!("t{}", i), "done": i % 2 == 0}))
            .collect();
        let mut fx = Fixture::new(
            json!({ "todos": todos }),
            r#"<ul data-list="todos"><template data-item><li data-class="done: item.done" data-show="item.title"><span data-text="item.title"></span><input type="checkbox" data-checked="item.done"></li></template></ul>"#,
        );

        for _ in 0..5 {
            let (report, _) = fx.bind();
            assert_eq!(report.instances_created, 100);
        }
        // data-list, data-class spec, data-show/data-text (shared source), data-checked
        assert_eq!(fx.binder.cache().compilations(), 4);
    }

    #[test]
    fn test_args_changes_are_reported() {
        let mut fx = Fixture::new(
            json!({"count": 1}),
            r#"<div><child-view data-arg-count="count"><p data-text="count"></p></child-view></div>"#,
        );
        let (report, _) = fx.bind();
        let child = fx.first("child-view");
        assert_eq!(report.args_changed, vec![child]);
        assert_eq!(fx.doc.arg(child, "count").and_then(Value::as_f64), Some(1.0));
        // Nested host owns its subtree
        assert_eq!(fx.doc.text_content(child), "");

        let (report, _) = fx.bind();
        assert!(report.args_changed.is_empty());
        fx.state.set("count", 2);
        let (report, _) = fx.bind();
        assert_eq!(report.args_changed, vec![child]);
    }

    #[test]
    fn test_write_back_value_and_number_coercion() {
        let mut fx = Fixture::new(
            json!({"name": "", "age": 0}),
            r#"<input data-value="name"><input type="number" data-value="state.age">"#,
        );
        fx.bind();
        let inputs = fx.doc.query_tag(fx.doc.root(), "input");

        fx.doc.set_value(inputs[0], "grace");
        fx.doc.set_value(inputs[1], "42");
        assert!(fx.binder.write_back(&fx.doc, inputs[0], &fx.state));
        assert!(fx.binder.write_back(&fx.doc, inputs[1], &fx.state));

        assert_eq!(fx.state.get("name").as_str(), Some("grace"));
        assert_eq!(fx.state.get("age").as_f64(), Some(42.0));
        assert_eq!(fx.frames.pending(), 1);
    }

    #[test]
    fn test_write_back_into_list_item() {
        let mut fx = Fixture::new(
            json!({"todos": [{"done": false}, {"done": false}]}),
            r#"<ul data-list="todos"><template data-item><li><input type="checkbox" data-checked="item.done"></li></template></ul>"#,
        );
        fx.bind();
        let boxes = fx.doc.query_tag(fx.doc.root(), "input");
        let second = boxes[boxes.len() - 1];

        fx.doc.set_checked(second, true);
        assert!(fx.binder.write_back(&fx.doc, second, &fx.state));

        let paths: Vec<String> = fx.engine.pending_changes().into_iter().map(|c| c.path).collect();
        assert_eq!(paths, vec!["state.todos.1.done"]);
    }
}
