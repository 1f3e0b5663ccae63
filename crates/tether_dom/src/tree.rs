//! In-memory element tree
//!
//! An arena of element and text nodes addressed by [`NodeId`]. This is the
//! tree the binding engine mutates: attributes, class lists, text content,
//! form-control properties, and inserted/removed list instances.
//!
//! Form controls carry `value` and `checked` as properties separate from
//! their attributes, initialized from the attributes at parse time.

use indexmap::{IndexMap, IndexSet};
use slotmap::{new_key_type, Key, SlotMap};
use smallvec::SmallVec;
use tether_core::Value;

use crate::attrs;

new_key_type! {
    pub struct NodeId;
}

impl NodeId {
    /// Convert to a raw u64 representation
    pub fn to_raw(self) -> u64 {
        self.data().as_ffi()
    }

    /// Create from a raw u64 representation produced by [`to_raw`](Self::to_raw)
    pub fn from_raw(raw: u64) -> Self {
        Self::from(slotmap::KeyData::from_ffi(raw))
    }
}

/// Elements serialized without a closing tag
const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

pub fn is_void_tag(tag: &str) -> bool {
    VOID_TAGS.contains(&tag)
}

/// List item bound to an instance root
#[derive(Clone, Debug)]
pub struct ItemScope {
    pub item: Value,
    pub index: usize,
}

/// An element node
#[derive(Clone, Debug, Default)]
pub struct Element {
    pub tag: String,
    pub attrs: IndexMap<String, String>,
    /// Form-control value property
    pub value: String,
    /// Checkbox/radio checked property
    pub checked: bool,
    /// Values surfaced by `data-arg-*` bindings
    pub args: IndexMap<String, Value>,
    /// Item scope, set on list instance roots
    pub item_scope: Option<ItemScope>,
    /// Classes added by the last `data-class` evaluation
    pub(crate) bound_classes: IndexSet<String>,
    /// Instances produced by the last list rebuild
    pub(crate) list_instances: Vec<NodeId>,
    pub(crate) list_rendered: bool,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Copy markup-level state only; binding state stays behind
    fn fresh_copy(&self) -> Self {
        Self {
            tag: self.tag.clone(),
            attrs: self.attrs.clone(),
            value: self.value.clone(),
            checked: self.checked,
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug)]
pub enum NodeData {
    Element(Element),
    Text(String),
}

#[derive(Debug)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// Element tree arena
#[derive(Debug)]
pub struct Document {
    nodes: SlotMap<NodeId, Node>,
    root: NodeId,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Create a document with an empty fragment root
    pub fn new() -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node {
            data: NodeData::Element(Element::new("")),
            parent: None,
            children: Vec::new(),
        });
        Self { nodes, root }
    }

    /// The fragment root (serialized as its children only)
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of live nodes, including the root
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    // =========================================================================
    // CONSTRUCTION
    // =========================================================================

    pub fn create_element(&mut self, element: Element) -> NodeId {
        self.nodes.insert(Node {
            data: NodeData::Element(element),
            parent: None,
            children: Vec::new(),
        })
    }

    pub fn create_text(&mut self, text: impl Into<String>) -> NodeId {
        self.nodes.insert(Node {
            data: NodeData::Text(text.into()),
            parent: None,
            children: Vec::new(),
        })
    }

    /// Append `child` to `parent`, detaching it from any previous parent
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.insert_before(parent, child, None);
    }

    /// Insert `child` before `reference` (or at the end)
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        if !self.nodes.contains_key(parent) || !self.nodes.contains_key(child) {
            return;
        }
        self.detach(child);

        let Some(parent_node) = self.nodes.get_mut(parent) else {
            return;
        };
        let position = reference
            .and_then(|r| parent_node.children.iter().position(|c| *c == r))
            .unwrap_or(parent_node.children.len());
        parent_node.children.insert(position, child);

        if let Some(child_node) = self.nodes.get_mut(child) {
            child_node.parent = Some(parent);
        }
    }

    /// Unlink a node from its parent, keeping it alive
    pub fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.nodes.get(node).and_then(|n| n.parent) else {
            return;
        };
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.retain(|c| *c != node);
        }
        if let Some(node) = self.nodes.get_mut(node) {
            node.parent = None;
        }
    }

    /// Detach a node and free it with its whole subtree
    pub fn remove(&mut self, node: NodeId) {
        if node == self.root {
            return;
        }
        self.detach(node);
        let mut stack = vec![node];
        while let Some(current) = stack.pop() {
            if let Some(removed) = self.nodes.remove(current) {
                stack.extend(removed.children);
            }
        }
    }

    /// Deep-copy a subtree as a detached node
    ///
    /// Only markup-level state is copied: attributes, text and form
    /// properties. Binding state (args, item scopes, list bookkeeping) is not.
    pub fn clone_subtree(&mut self, node: NodeId) -> Option<NodeId> {
        let data = match &self.nodes.get(node)?.data {
            NodeData::Element(element) => NodeData::Element(element.fresh_copy()),
            NodeData::Text(text) => NodeData::Text(text.clone()),
        };
        let children = self.nodes.get(node)?.children.clone();

        let copy = self.nodes.insert(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        for child in children {
            if let Some(child_copy) = self.clone_subtree(child) {
                self.append_child(copy, child_copy);
            }
        }
        Some(copy)
    }

    // =========================================================================
    // NAVIGATION
    // =========================================================================

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node)?.parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Element children only
    pub fn child_elements(&self, node: NodeId) -> Vec<NodeId> {
        self.children(node)
            .iter()
            .copied()
            .filter(|c| self.is_element(*c))
            .collect()
    }

    /// Node and its ancestors, nearest first
    pub fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(node), move |n| self.parent(*n))
            .filter(move |n| self.nodes.contains_key(*n))
    }

    /// Pre-order walk of `node` and everything below it
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: SmallVec<[NodeId; 16]> = SmallVec::new();
        if self.nodes.contains_key(node) {
            stack.push(node);
        }
        while let Some(current) = stack.pop() {
            out.push(current);
            for child in self.children(current).iter().rev() {
                stack.push(*child);
            }
        }
        out
    }

    /// Elements below `node` (inclusive) carrying an attribute
    pub fn query_attr(&self, node: NodeId, name: &str) -> Vec<NodeId> {
        self.descendants(node)
            .into_iter()
            .filter(|n| self.attr(*n, name).is_some())
            .collect()
    }

    /// Elements below `node` (inclusive) with a tag
    pub fn query_tag(&self, node: NodeId, tag: &str) -> Vec<NodeId> {
        self.descendants(node)
            .into_iter()
            .filter(|n| self.tag(*n) == Some(tag))
            .collect()
    }

    // =========================================================================
    // NODE DATA
    // =========================================================================

    pub fn data(&self, node: NodeId) -> Option<&NodeData> {
        self.nodes.get(node).map(|n| &n.data)
    }

    pub fn element(&self, node: NodeId) -> Option<&Element> {
        match &self.nodes.get(node)?.data {
            NodeData::Element(element) => Some(element),
            NodeData::Text(_) => None,
        }
    }

    pub fn element_mut(&mut self, node: NodeId) -> Option<&mut Element> {
        match &mut self.nodes.get_mut(node)?.data {
            NodeData::Element(element) => Some(element),
            NodeData::Text(_) => None,
        }
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        self.element(node).is_some()
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(|e| e.tag.as_str())
    }

    pub fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node)?.attr(name)
    }

    pub fn has_attr(&self, node: NodeId, name: &str) -> bool {
        self.attr(node, name).is_some()
    }

    /// Set an attribute. Returns `false` if it already had this value.
    pub fn set_attr(&mut self, node: NodeId, name: &str, value: &str) -> bool {
        let Some(element) = self.element_mut(node) else {
            return false;
        };
        if element.attr(name) == Some(value) {
            return false;
        }
        element.attrs.insert(name.to_string(), value.to_string());
        true
    }

    pub fn remove_attr(&mut self, node: NodeId, name: &str) -> bool {
        self.element_mut(node)
            .is_some_and(|e| e.attrs.shift_remove(name).is_some())
    }

    /// Whitespace-separated entries of the `class` attribute
    pub fn class_list(&self, node: NodeId) -> Vec<String> {
        self.attr(node, "class")
            .map(|classes| classes.split_whitespace().map(String::from).collect())
            .unwrap_or_default()
    }

    pub fn has_class(&self, node: NodeId, name: &str) -> bool {
        self.attr(node, "class")
            .is_some_and(|classes| classes.split_whitespace().any(|c| c == name))
    }

    /// Add or remove a class. Returns `true` if the list changed.
    pub fn toggle_class(&mut self, node: NodeId, name: &str, on: bool) -> bool {
        if name.is_empty() || self.has_class(node, name) == on {
            return false;
        }
        let mut classes = self.class_list(node);
        if on {
            classes.push(name.to_string());
        } else {
            classes.retain(|c| c != name);
        }
        if classes.is_empty() {
            self.remove_attr(node, "class")
        } else {
            self.set_attr(node, "class", &classes.join(" "))
        }
    }

    /// Concatenated text of a subtree
    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        for n in self.descendants(node) {
            if let Some(NodeData::Text(text)) = self.data(n) {
                out.push_str(text);
            }
        }
        out
    }

    /// Replace an element's children with a single text node
    ///
    /// Returns `false` (and touches nothing) when the text is unchanged.
    pub fn set_text_content(&mut self, node: NodeId, text: &str) -> bool {
        if !self.is_element(node) {
            if let Some(Node {
                data: NodeData::Text(current),
                ..
            }) = self.nodes.get_mut(node)
            {
                if current == text {
                    return false;
                }
                *current = text.to_string();
                return true;
            }
            return false;
        }

        let children = self.children(node).to_vec();
        if let [only] = children.as_slice() {
            if let Some(NodeData::Text(current)) = self.data(*only) {
                if current == text {
                    return false;
                }
            }
        } else if children.is_empty() && text.is_empty() {
            return false;
        }

        for child in children {
            self.remove(child);
        }
        if !text.is_empty() {
            let text_node = self.create_text(text);
            self.append_child(node, text_node);
        }
        true
    }

    pub fn value(&self, node: NodeId) -> &str {
        self.element(node).map(|e| e.value.as_str()).unwrap_or("")
    }

    pub fn set_value(&mut self, node: NodeId, value: &str) -> bool {
        match self.element_mut(node) {
            Some(element) if element.value != value => {
                element.value = value.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn checked(&self, node: NodeId) -> bool {
        self.element(node).is_some_and(|e| e.checked)
    }

    pub fn set_checked(&mut self, node: NodeId, checked: bool) -> bool {
        match self.element_mut(node) {
            Some(element) if element.checked != checked => {
                element.checked = checked;
                true
            }
            _ => false,
        }
    }

    pub fn arg(&self, node: NodeId, name: &str) -> Option<&Value> {
        self.element(node)?.args.get(name)
    }

    /// Store an arg value. Returns `true` if it changed.
    pub fn set_arg(&mut self, node: NodeId, name: &str, value: Value) -> bool {
        let Some(element) = self.element_mut(node) else {
            return false;
        };
        if element.args.get(name).is_some_and(|current| current.same(&value)) {
            return false;
        }
        element.args.insert(name.to_string(), value);
        true
    }

    /// Nearest item scope at or above `node`
    pub fn item_scope(&self, node: NodeId) -> Option<&ItemScope> {
        self.ancestors(node)
            .find_map(|n| self.element(n).and_then(|e| e.item_scope.as_ref()))
    }

    /// Whether `node` is a `<template data-item>`
    pub fn is_item_template(&self, node: NodeId) -> bool {
        self.tag(node) == Some(attrs::TEMPLATE_TAG) && self.has_attr(node, attrs::ITEM)
    }

    // =========================================================================
    // SERIALIZATION
    // =========================================================================

    /// Serialize a node (the root serializes as its children)
    pub fn to_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        if node == self.root {
            for child in self.children(node) {
                self.write_html(*child, &mut out);
            }
        } else {
            self.write_html(node, &mut out);
        }
        out
    }

    /// Serialize the whole document
    pub fn html(&self) -> String {
        self.to_html(self.root)
    }

    /// Serialize only the children of a node
    pub fn inner_html(&self, node: NodeId) -> String {
        let mut out = String::new();
        for child in self.children(node) {
            self.write_html(*child, &mut out);
        }
        out
    }

    fn write_html(&self, node: NodeId, out: &mut String) {
        match self.data(node) {
            Some(NodeData::Text(text)) => escape_into(text, false, out),
            Some(NodeData::Element(element)) => {
                out.push('<');
                out.push_str(&element.tag);
                for (name, value) in &element.attrs {
                    out.push(' ');
                    out.push_str(name);
                    if !value.is_empty() {
                        out.push_str("=\"");
                        escape_into(value, true, out);
                        out.push('"');
                    }
                }
                out.push('>');
                if is_void_tag(&element.tag) {
                    return;
                }
                for child in self.children(node) {
                    self.write_html(*child, out);
                }
                out.push_str("</");
                out.push_str(&element.tag);
                out.push('>');
            }
            None => {}
        }
    }
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_with_div() -> (Document, NodeId) {
        let mut doc = Document::new();
        let div = doc.create_element(Element::new("div"));
        let root = doc.root();
        doc.append_child(root, div);
        (doc, div)
    }

    #[test]
    fn test_set_text_content_detects_change() {
        let (mut doc, div) = doc_with_div();
        assert!(doc.set_text_content(div, "hi"));
        assert!(!doc.set_text_content(div, "hi"));
        assert_eq!(doc.html(), "<div>hi</div>");
        assert!(doc.set_text_content(div, ""));
        assert_eq!(doc.html(), "<div></div>");
    }

    #[test]
    fn test_toggle_class_keeps_static_classes() {
        let (mut doc, div) = doc_with_div();
        doc.set_attr(div, "class", "card");
        assert!(doc.toggle_class(div, "active", true));
        assert!(!doc.toggle_class(div, "active", true));
        assert_eq!(doc.attr(div, "class"), Some("card active"));
        assert!(doc.toggle_class(div, "active", false));
        assert_eq!(doc.class_list(div), vec!["card"]);
    }

    #[test]
    fn test_remove_frees_subtree() {
        let (mut doc, div) = doc_with_div();
        let span = doc.create_element(Element::new("span"));
        doc.append_child(div, span);
        doc.set_text_content(span, "x");
        assert_eq!(doc.len(), 4);

        doc.remove(div);
        assert_eq!(doc.len(), 1);
        assert!(!doc.contains(span));
        assert!(doc.children(doc.root()).is_empty());
    }

    #[test]
    fn test_clone_subtree_copies_markup_state_only() {
        let (mut doc, div) = doc_with_div();
        doc.set_attr(div, "title", "t");
        doc.set_arg(div, "n", Value::from(1));
        doc.set_text_content(div, "body");

        let copy = doc.clone_subtree(div).unwrap();
        assert_eq!(doc.parent(copy), None);
        assert_eq!(doc.to_html(copy), "<div title=\"t\">body</div>");
        assert!(doc.arg(copy, "n").is_none());
    }

    #[test]
    fn test_serialization_escapes() {
        let (mut doc, div) = doc_with_div();
        doc.set_attr(div, "title", "a \"b\" & c");
        doc.set_text_content(div, "<b>");
        let input = doc.create_element(Element::new("input"));
        doc.append_child(div, input);
        doc.set_attr(input, "disabled", "");
        assert_eq!(
            doc.html(),
            "<div title=\"a &quot;b&quot; &amp; c\">&lt;b&gt;<input disabled></div>"
        );
    }
}
