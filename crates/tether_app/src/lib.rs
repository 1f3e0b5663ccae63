//! Tether Application Host
//!
//! Ties the reactive state engine to the element tree: wraps the initial
//! state, mounts component instances, and turns state writes into
//! frame-batched re-renders.
//!
//! # Example
//!
//! ```rust
//! use tether_app::prelude::*;
//!
//! let components = Components::new().with("hello-card", component_fn(|cx| {
//!     if cx.is_first_render() {
//!         cx.set_template(r#"<p data-text="name"></p>"#)?;
//!     }
//!     Ok(())
//! }));
//!
//! let app = App::new(Some(Value::from(serde_json::json!({"name": "Ada"}))), components);
//! app.load("<hello-card></hello-card>").unwrap();
//! assert_eq!(app.html(), r#"<hello-card><p data-text="name">Ada</p></hello-card>"#);
//!
//! app.state().set("name", "Grace");
//! app.tick();
//! assert_eq!(app.html(), r#"<hello-card><p data-text="name">Grace</p></hello-card>"#);
//! ```

mod app;
mod component;
mod context;
mod error;
pub mod logging;


pub use app::{App, AppConfig, Render};
pub use component::{component_fn, noop_render, Component, Components, Detail, RenderFn, RenderOnly};
pub use context::{HandlerContext, RenderContext};
pub use error::{AppError, Result};
pub use logging::init_logging;

// Re-export the engine and tree APIs for convenience
pub use tether_core::{
    Diagnostics, Engine, EngineConfig, Fault, RenderError, RenderResult, Value, Writer,
};
pub use tether_dom::{Document, NodeId};

/// Prelude module - import everything commonly needed
pub mod prelude {
    pub use crate::app::{App, AppConfig, Render};
    pub use crate::component::{component_fn, Component, Components, Detail, RenderFn};
    pub use crate::context::{HandlerContext, RenderContext};
    pub use crate::error::{AppError, Result};

    pub use tether_core::{Fault, Reader, RenderError, RenderResult, Tracked, Value, Writer};
    pub use tether_dom::{Document, NodeId};
}
