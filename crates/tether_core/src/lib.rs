//! Tether Core Runtime
//!
//! This crate provides the reactive state primitives of the Tether UI runtime:
//!
//! - **Value Model**: A self-describing state graph (records, sequences, scalars, opaque payloads)
//! - **Write Accessor**: Detects mutations and records the changed dotted paths
//! - **Read Accessor**: Tracks which paths a render depended on
//! - **Subscriptions**: Path-based registry with dot-aligned hierarchical matching
//! - **Frame Batching**: All mutations of one frame are dispatched together
//!
//! # Example
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use tether_core::{Engine, EngineConfig, Value};
//!
//! let (engine, frames) = Engine::with_frame_queue(EngineConfig::default());
//! let state = engine.wrap(Value::from(serde_json::json!({"user": {"name": "ada"}})));
//!
//! let renders = Rc::new(Cell::new(0));
//! let counter = renders.clone();
//! let render = engine.register_render(move || {
//!     counter.set(counter.get() + 1);
//!     Ok(())
//! });
//!
//! // Read through a tracked accessor, then subscribe to what was read
//! let (reader, log) = engine.track();
//! assert_eq!(reader.get_path("user.name").value().as_str(), Some("ada"));
//! engine.subscribe(render, &log);
//!
//! // Two writes, one frame, one render
//! let user = state.at("user").unwrap();
//! user.set("name", "grace");
//! user.set("name", "linus");
//! frames.run_frame();
//! assert_eq!(renders.get(), 1);
//! ```

pub mod classify;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod marks;
pub mod path;
pub mod read;
pub mod registry;
pub mod scheduler;
pub mod value;
pub mod write;

pub use classify::{classify, is_plain, Shape};
pub use config::EngineConfig;
pub use diagnostics::{Diagnostics, ReportHook};
pub use engine::{Change, Engine, EngineStats, RenderCallback};
pub use error::{ConfigError, Fault, RenderError, RenderResult};
pub use read::{AccessLog, Reader, Tracked};
pub use registry::{RenderId, SubscriptionRegistry};
pub use scheduler::{FrameCallback, FrameHandle, FrameHost, FrameQueue, Scheduler};
pub use value::{Key, Opaque, Record, Sequence, Value};
pub use write::Writer;
