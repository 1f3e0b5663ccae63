//! Components
//!
//! A component is the logic behind a custom-element tag (`<todo-list>`). It
//! builds one render function per mounted instance and optionally handles
//! events emitted from inside the instance.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use tether_core::{RenderError, RenderResult, Value};

use crate::context::{HandlerContext, RenderContext};

/// Per-instance render logic, run before the bindings are applied
pub type RenderFn = Rc<dyn Fn(&mut RenderContext<'_>) -> RenderResult>;

/// Identifies one component instance
#[derive(Clone, Debug)]
pub struct Detail {
    /// Position among instances of the same tag, in mount order
    pub index: usize,
    pub tag: String,
    /// Data payload supplied at mount time; exposed to bindings as `detail`
    pub data: Value,
}

impl Detail {
    pub fn new(tag: impl Into<String>, index: usize) -> Self {
        Self {
            index,
            tag: tag.into(),
            data: Value::Null,
        }
    }

    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = data.into();
        self
    }
}

/// Logic for a component tag
pub trait Component {
    /// Build the render function for one instance
    ///
    /// An error here does not abort the mount: the instance falls back to a
    /// render that only applies bindings.
    fn setup(&self, detail: &Detail) -> Result<RenderFn, RenderError>;

    /// Handle an event emitted from inside an instance
    fn handle(&self, _cx: &mut HandlerContext<'_>) -> RenderResult {
        Ok(())
    }
}

/// A render that does nothing beyond the bindings
pub fn noop_render() -> RenderFn {
    Rc::new(|_: &mut RenderContext<'_>| Ok(()))
}

/// A component made from a single render closure
pub struct RenderOnly<F> {
    render: Rc<F>,
}

/// Wrap a closure as a component with no event handling
pub fn component_fn<F>(render: F) -> RenderOnly<F>
where
    F: Fn(&mut RenderContext<'_>) -> RenderResult + 'static,
{
    RenderOnly {
        render: Rc::new(render),
    }
}

impl<F> Component for RenderOnly<F>
where
    F: Fn(&mut RenderContext<'_>) -> RenderResult + 'static,
{
    fn setup(&self, _detail: &Detail) -> Result<RenderFn, RenderError> {
        let render = self.render.clone();
        Ok(Rc::new(move |cx: &mut RenderContext<'_>| render(cx)))
    }
}

/// Component registry, keyed by lowercase tag name
#[derive(Clone, Default)]
pub struct Components {
    entries: IndexMap<String, Rc<dyn Component>, FxBuildHasher>,
}

impl Components {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style registration
    pub fn with(mut self, tag: &str, component: impl Component + 'static) -> Self {
        self.register(tag, component);
        self
    }

    /// Register a component; replaces any earlier one for the same tag
    pub fn register(&mut self, tag: &str, component: impl Component + 'static) {
        self.entries
            .insert(tag.to_ascii_lowercase(), Rc::new(component));
    }

    pub fn get(&self, tag: &str) -> Option<Rc<dyn Component>> {
        self.entries.get(&tag.to_ascii_lowercase()).cloned()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.entries.contains_key(&tag.to_ascii_lowercase())
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Components {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Components")
            .field("tags", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
