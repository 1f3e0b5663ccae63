//! Contexts handed to component logic
//!
//! [`RenderContext`] is read-only with respect to state: reads go through a
//! tracking [`Reader`] so the render subscribes to what it touched, and
//! attempted writes are reported and discarded. [`HandlerContext`] carries a
//! [`Writer`] for event handlers.

use tether_core::{Reader, RenderError, Tracked, Value, Writer};
use tether_dom::{Document, NodeId};

use crate::component::Detail;

/// Passed to a component's render function
pub struct RenderContext<'a> {
    state: &'a Reader,
    doc: &'a mut Document,
    element: NodeId,
    detail: &'a Detail,
    renders: u64,
}

impl<'a> RenderContext<'a> {
    pub(crate) fn new(
        state: &'a Reader,
        doc: &'a mut Document,
        element: NodeId,
        detail: &'a Detail,
        renders: u64,
    ) -> Self {
        Self {
            state,
            doc,
            element,
            detail,
            renders,
        }
    }

    /// Tracked, read-only view of state
    pub fn state(&self) -> &Reader {
        self.state
    }

    /// Read a dotted path relative to the state root
    pub fn read(&self, path: &str) -> Tracked {
        self.state.get_path(path)
    }

    /// The component element
    pub fn element(&self) -> NodeId {
        self.element
    }

    pub fn detail(&self) -> &Detail {
        self.detail
    }

    /// Number of completed renders of this instance
    pub fn render_count(&self) -> u64 {
        self.renders
    }

    pub fn is_first_render(&self) -> bool {
        self.renders == 0
    }

    /// Value passed down through `data-arg-<name>`
    pub fn arg(&self, name: &str) -> Value {
        self.doc
            .arg(self.element, name)
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn document(&self) -> &Document {
        self.doc
    }

    pub fn document_mut(&mut self) -> &mut Document {
        self.doc
    }

    /// Replace the element's children with parsed markup
    ///
    /// Bindings inside the new content are applied right after the render
    /// function returns. Markup errors fail the render.
    pub fn set_template(&mut self, markup: &str) -> Result<Vec<NodeId>, RenderError> {
        for child in self.doc.children(self.element).to_vec() {
            self.doc.remove(child);
        }
        self.doc
            .append_markup(self.element, markup)
            .map_err(|err| RenderError::Other(err.into()))
    }
}

/// Passed to a component's event handler
pub struct HandlerContext<'a> {
    state: Writer,
    doc: &'a mut Document,
    host: NodeId,
    target: NodeId,
    event: &'a str,
    payload: Value,
    detail: &'a Detail,
}

impl<'a> HandlerContext<'a> {
    pub(crate) fn new(
        state: Writer,
        doc: &'a mut Document,
        host: NodeId,
        target: NodeId,
        event: &'a str,
        payload: Value,
        detail: &'a Detail,
    ) -> Self {
        Self {
            state,
            doc,
            host,
            target,
            event,
            payload,
            detail,
        }
    }

    /// Write accessor for the state root
    pub fn state(&self) -> &Writer {
        &self.state
    }

    pub fn event(&self) -> &str {
        self.event
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// The component element that owns the handler
    pub fn host(&self) -> NodeId {
        self.host
    }

    /// The element the event was emitted on
    pub fn target(&self) -> NodeId {
        self.target
    }

    pub fn detail(&self) -> &Detail {
        self.detail
    }

    pub fn arg(&self, name: &str) -> Value {
        self.doc.arg(self.host, name).cloned().unwrap_or(Value::Null)
    }

    /// List item the target was rendered for, if any
    pub fn item(&self) -> Option<Value> {
        self.doc.item_scope(self.target).map(|scope| scope.item.clone())
    }

    pub fn index(&self) -> Option<usize> {
        self.doc.item_scope(self.target).map(|scope| scope.index)
    }

    /// Writer for the target's list item
    ///
    /// Untracked if the item was never reached through the state root.
    pub fn item_writer(&self) -> Option<Writer> {
        let item = self.item()?;
        self.state.for_container(&item)
    }

    pub fn document(&self) -> &Document {
        self.doc
    }

    pub fn document_mut(&mut self) -> &mut Document {
        self.doc
    }
}
