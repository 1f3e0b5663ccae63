//! Tether DOM
//!
//! The element tree and declarative binding engine of the Tether runtime.
//!
//! # Modules
//!
//! - [`tree`] - element/text node arena with attributes, classes, and form properties
//! - [`markup`] - HTML-like fragment parser
//! - [`expr`] - binding expression compiler and its cache
//! - [`scope`] - render scopes and expression evaluation
//! - [`binder`] - applies `data-*` bindings, rebuilds lists, writes form values back
//! - [`attrs`] - the attribute vocabulary
//!
//! # Example
//!
//! ```rust
//! use tether_core::{Engine, EngineConfig, Value};
//! use tether_dom::{Binder, Document, Scope};
//!
//! let (engine, _frames) = Engine::with_frame_queue(EngineConfig::default());
//! engine.wrap(Value::from(serde_json::json!({"greeting": "hello"})));
//!
//! let mut doc = Document::parse_fragment(r#"<h1 data-text="greeting"></h1>"#).unwrap();
//! let binder = Binder::new(engine.diagnostics().clone());
//!
//! let (reader, log) = engine.track();
//! let root = doc.root();
//! binder.apply_bindings(&mut doc, root, &Scope::new(reader));
//!
//! assert_eq!(doc.html(), r#"<h1 data-text="greeting">hello</h1>"#);
//! assert!(log.contains("greeting"));
//! ```

pub mod attrs;
pub mod binder;
pub mod error;
pub mod expr;
pub mod markup;
pub mod scope;
pub mod tree;

pub use binder::{is_component_host, BindReport, Binder};
pub use error::{ExprError, MarkupError, MarkupResult};
pub use expr::{compile, compile_class_spec, ClassSpec, Expr, ExpressionCache, Literal};
pub use scope::Scope;
pub use tree::{Document, Element, ItemScope, NodeData, NodeId};
