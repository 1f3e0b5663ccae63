//! The reactive state engine
//!
//! Owns everything the two accessors share: identity marks, the pending
//! change set, the subscription registry, registered render callbacks, the
//! frame scheduler and the diagnostics channel.
//!
//! # Flow
//!
//! 1. [`Engine::wrap`] instruments the state graph and returns the
//!    [`Writer`] for its root.
//! 2. A render builds a fresh [`Reader`] with [`Engine::track`], reads
//!    through it, then calls [`Engine::subscribe`] with the access log.
//! 3. Writes through any [`Writer`] append to the pending change set and
//!    request a frame.
//! 4. When the frame fires, the whole change set is dispatched: every
//!    affected render runs once.
//!
//! ```rust
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use tether_core::{Engine, EngineConfig, Value};
//!
//! let (engine, frames) = Engine::with_frame_queue(EngineConfig::default());
//! let state = engine.wrap(Value::from(serde_json::json!({"count": 0})));
//!
//! let runs = Rc::new(Cell::new(0));
//! let counter = runs.clone();
//! let render = engine.register_render(move || {
//!     counter.set(counter.get() + 1);
//!     Ok(())
//! });
//! let (reader, log) = engine.track();
//! let _ = reader.get("count");
//! engine.subscribe(render, &log);
//!
//! state.set("count", 1);
//! state.set("count", 2);
//! frames.run_frame();
//! assert_eq!(runs.get(), 1);
//! ```

use indexmap::IndexSet;
use slotmap::SlotMap;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::classify::is_plain;
use crate::config::EngineConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{Fault, RenderResult};
use crate::marks::Marks;
use crate::path;
use crate::read::{AccessLog, Reader};
use crate::registry::{RenderId, SubscriptionRegistry};
use crate::scheduler::{FrameHost, FrameQueue, Scheduler};
use crate::value::{Record, Value};
use crate::write::Writer;

/// Render callback registered with the engine
pub type RenderCallback = Rc<dyn Fn() -> RenderResult>;

/// One recorded mutation
#[derive(Clone, Debug)]
pub struct Change {
    /// Full wrap-time path (`state.user.name`, or the sequence's own path)
    pub path: String,
    /// Value written (the sequence itself for sequence mutations)
    pub value: Value,
}

pub(crate) struct EngineInner {
    pub(crate) config: EngineConfig,
    pub(crate) marks: RefCell<Marks>,
    pub(crate) diagnostics: Diagnostics,
    root: RefCell<Value>,
    pending: RefCell<Vec<Change>>,
    registry: RefCell<SubscriptionRegistry>,
    renders: RefCell<SlotMap<RenderId, RenderCallback>>,
    /// Targets of the dispatch pass in progress
    pass: RefCell<Option<IndexSet<RenderId>>>,
    scheduler: Scheduler,
    writes_recorded: Cell<u64>,
    dispatch_passes: Cell<u64>,
    renders_invoked: Cell<u64>,
}

impl EngineInner {
    /// Depth-first instrumentation pass
    ///
    /// Marks every plain container reachable from `value` that is not
    /// already marked. The root's internal bookkeeping field is skipped.
    pub(crate) fn instrument(&self, value: &Value, path: String, is_root: bool) {
        if !self.marks.borrow_mut().mark(value, path.clone()) {
            return;
        }

        let children: Vec<(String, Value)> = match value {
            Value::Record(record) => record.entries(),
            Value::Sequence(sequence) => sequence
                .to_vec()
                .into_iter()
                .enumerate()
                .map(|(i, v)| (i.to_string(), v))
                .collect(),
            _ => return,
        };

        for (segment, child) in children {
            if is_root && segment == self.config.internal_key {
                continue;
            }
            if is_plain(&child) {
                self.instrument(&child, path::join(&path, &segment), false);
            }
        }
    }

    /// Append a change and make sure a frame is coming
    pub(crate) fn record(self: &Rc<Self>, path: String, value: Value) {
        tracing::trace!(path = %path, "state write recorded");
        self.pending.borrow_mut().push(Change { path, value });
        self.writes_recorded.set(self.writes_recorded.get() + 1);

        let weak = Rc::downgrade(self);
        self.scheduler.schedule(move || {
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.run_frame();
                }
            })
        });
    }

    /// Frame callback: take the batch, free the handle, dispatch
    ///
    /// The handle is released before renders run so that a write made
    /// during the pass schedules the next frame instead of being dropped.
    fn run_frame(&self) {
        self.scheduler.release();
        let changes = std::mem::take(&mut *self.pending.borrow_mut());
        self.dispatch(&changes);
    }

    fn dispatch(&self, changes: &[Change]) -> usize {
        if changes.is_empty() {
            return 0;
        }

        let mut targets: IndexSet<RenderId> = IndexSet::new();
        {
            let registry = self.registry.borrow();
            for change in changes {
                registry.resolve(path::relative(&change.path), &mut targets);
            }
        }

        tracing::debug!(
            changes = changes.len(),
            renders = targets.len(),
            "dispatch pass"
        );
        self.dispatch_passes.set(self.dispatch_passes.get() + 1);

        // Walked by index: renders queued by `defer` join the same pass
        let outer = self.pass.replace(Some(targets));
        let mut invoked = 0;
        let mut index = 0;
        loop {
            let next = self
                .pass
                .borrow()
                .as_ref()
                .and_then(|targets| targets.get_index(index).copied());
            let Some(render) = next else {
                break;
            };
            index += 1;
            if self.invoke(render) {
                invoked += 1;
            }
        }
        self.pass.replace(outer);
        invoked
    }

    /// Queue a render into the pass in progress
    ///
    /// Returns `false` when no pass is running. A render already in the pass
    /// is not queued again.
    fn defer(&self, render: RenderId) -> bool {
        match self.pass.borrow_mut().as_mut() {
            Some(targets) => {
                if targets.insert(render) {
                    tracing::trace!(?render, "render joined the dispatch pass");
                }
                true
            }
            None => false,
        }
    }

    /// Run one render, isolating its failure from the caller
    fn invoke(&self, render: RenderId) -> bool {
        // No borrow is held while user code runs
        let Some(callback) = self.renders.borrow().get(render).cloned() else {
            return false;
        };

        self.renders_invoked.set(self.renders_invoked.get() + 1);
        if let Err(err) = callback() {
            self.diagnostics.report(Fault::RenderFailed {
                render: format!("{:?}", render),
                message: err.to_string(),
            });
        }
        true
    }
}

/// Handle to a reactive state engine (cheap to clone)
#[derive(Clone)]
pub struct Engine {
    inner: Rc<EngineInner>,
}

impl Engine {
    /// Create an engine driven by the given frame source
    pub fn new(config: EngineConfig, host: Rc<dyn FrameHost>) -> Self {
        let diagnostics = Diagnostics::new(config.report_capacity);
        Self {
            inner: Rc::new(EngineInner {
                config,
                marks: RefCell::new(Marks::new()),
                diagnostics,
                root: RefCell::new(Value::Record(Record::new())),
                pending: RefCell::new(Vec::new()),
                registry: RefCell::new(SubscriptionRegistry::new()),
                renders: RefCell::new(SlotMap::with_key()),
                pass: RefCell::new(None),
                scheduler: Scheduler::new(host),
                writes_recorded: Cell::new(0),
                dispatch_passes: Cell::new(0),
                renders_invoked: Cell::new(0),
            }),
        }
    }

    /// Create an engine with its own in-process [`FrameQueue`]
    pub fn with_frame_queue(config: EngineConfig) -> (Self, Rc<FrameQueue>) {
        let frames = Rc::new(FrameQueue::new());
        (Self::new(config, frames.clone()), frames)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.inner.diagnostics
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Instrument a state graph and make it the engine's root
    ///
    /// A scalar root is replaced by an empty record: the root must be a
    /// container for writes to have somewhere to land.
    pub fn wrap(&self, root: Value) -> Writer {
        let root = if is_plain(&root) {
            root
        } else {
            if !root.is_null() {
                tracing::debug!(kind = root.type_name(), "scalar state root replaced by a record");
            }
            Value::Record(Record::new())
        };

        self.inner
            .instrument(&root, self.inner.config.root_segment.clone(), true);
        *self.inner.root.borrow_mut() = root.clone();
        tracing::debug!(marked = self.inner.marks.borrow().len(), "state wrapped");

        Writer::new(
            root,
            Some(self.inner.config.root_segment.clone()),
            true,
            self.inner.clone(),
        )
    }

    /// Writer for the current root
    pub fn root(&self) -> Writer {
        let root = self.inner.root.borrow().clone();
        Writer::new(
            root,
            Some(self.inner.config.root_segment.clone()),
            true,
            self.inner.clone(),
        )
    }

    /// The current root value (unwrapped, for inspection)
    pub fn root_value(&self) -> Value {
        self.inner.root.borrow().clone()
    }

    /// Writer for any container in the graph
    ///
    /// Marked containers get a tracked writer at their wrap-time path;
    /// unmarked ones (attached without an instrumented write) get an
    /// untracked writer. Scalars have no writer.
    pub fn writer_for(&self, value: &Value) -> Option<Writer> {
        if !is_plain(value) {
            return None;
        }
        let path = self.inner.marks.borrow().path_of(value).map(String::from);
        let is_root = value.same(&self.inner.root.borrow());
        Some(Writer::new(value.clone(), path, is_root, self.inner.clone()))
    }

    /// Build a fresh read accessor and its access log for one render
    pub fn track(&self) -> (Reader, AccessLog) {
        let log = AccessLog::new();
        let root = self.inner.root.borrow().clone();
        (Reader::new(root, log.clone(), self.inner.clone()), log)
    }

    // =========================================================================
    // RENDERS & SUBSCRIPTIONS
    // =========================================================================

    pub fn register_render<F>(&self, callback: F) -> RenderId
    where
        F: Fn() -> RenderResult + 'static,
    {
        self.inner.renders.borrow_mut().insert(Rc::new(callback))
    }

    /// Remove a render and all of its subscriptions
    pub fn dispose_render(&self, render: RenderId) {
        self.inner.renders.borrow_mut().remove(render);
        self.inner.registry.borrow_mut().remove_render(render);
    }

    /// Invoke a render
    ///
    /// Outside a dispatch pass the render runs now. During a pass it joins
    /// that pass instead, so it still runs at most once per pass. Failures
    /// are reported like dispatch failures. Returns `false` if the render is
    /// unknown.
    pub fn run_render(&self, render: RenderId) -> bool {
        if !self.inner.renders.borrow().contains_key(render) {
            return false;
        }
        if self.inner.defer(render) {
            return true;
        }
        self.inner.invoke(render)
    }

    /// Register every path a render read. Returns the number of new entries.
    pub fn subscribe(&self, render: RenderId, log: &AccessLog) -> usize {
        let paths = log.paths();
        let added = self
            .inner
            .registry
            .borrow_mut()
            .register_all(paths.iter().map(String::as_str), render);
        if added > 0 {
            tracing::trace!(?render, added, "subscriptions registered");
        }
        added
    }

    /// Relative paths a render is subscribed to
    pub fn subscriptions(&self, render: RenderId) -> Vec<String> {
        self.inner.registry.borrow().paths_for(render)
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    /// Run one dispatch pass over explicit changes
    ///
    /// Returns the number of renders invoked.
    pub fn notify(&self, changes: &[Change]) -> usize {
        self.inner.dispatch(changes)
    }

    /// Dispatch pending changes now instead of waiting for the frame
    ///
    /// The outstanding frame is cancelled. Returns the number of renders
    /// invoked.
    pub fn flush(&self) -> usize {
        self.inner.scheduler.cancel();
        let changes = std::mem::take(&mut *self.inner.pending.borrow_mut());
        self.inner.dispatch(&changes)
    }

    /// Changes recorded since the last dispatch
    pub fn pending_changes(&self) -> Vec<Change> {
        self.inner.pending.borrow().clone()
    }

    pub fn is_frame_pending(&self) -> bool {
        self.inner.scheduler.is_pending()
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Cancel the outstanding frame and drop all engine state
    pub fn teardown(&self) {
        let cancelled = self.inner.scheduler.cancel();
        self.inner.pending.borrow_mut().clear();
        self.inner.registry.borrow_mut().clear();
        self.inner.renders.borrow_mut().clear();
        self.inner.marks.borrow_mut().clear();
        *self.inner.root.borrow_mut() = Value::Record(Record::new());
        tracing::debug!(cancelled, "engine torn down");
    }

    /// Replace the state graph, cancelling any dispatch aimed at the old one
    ///
    /// Renders and subscriptions survive: subscriptions are relative paths
    /// and stay meaningful for a graph of the same shape.
    pub fn reset(&self, root: Value) -> Writer {
        self.inner.scheduler.cancel();
        self.inner.pending.borrow_mut().clear();
        self.inner.marks.borrow_mut().clear();
        self.wrap(root)
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            marked_containers: self.inner.marks.borrow().len(),
            subscribed_paths: self.inner.registry.borrow().len(),
            subscriptions: self.inner.registry.borrow().subscription_count(),
            renders: self.inner.renders.borrow().len(),
            pending_changes: self.inner.pending.borrow().len(),
            frames_requested: self.inner.scheduler.frames_requested(),
            writes_recorded: self.inner.writes_recorded.get(),
            dispatch_passes: self.inner.dispatch_passes.get(),
            renders_invoked: self.inner.renders_invoked.get(),
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("stats", &self.stats()).finish()
    }
}

/// Statistics about the engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub marked_containers: usize,
    pub subscribed_paths: usize,
    pub subscriptions: usize,
    pub renders: usize,
    pub pending_changes: usize,
    pub frames_requested: u64,
    pub writes_recorded: u64,
    pub dispatch_passes: u64,
    pub renders_invoked: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderError;
    use serde_json::json;

    fn engine_with(state: serde_json::Value) -> (Engine, Rc<FrameQueue>, Writer) {
        let (engine, frames) = Engine::with_frame_queue(EngineConfig::default());
        let root = engine.wrap(Value::from(state));
        (engine, frames, root)
    }

    /// Register a render that reads `paths` and counts its invocations
    fn counting_render(engine: &Engine, paths: &'static [&'static str]) -> (RenderId, Rc<Cell<u32>>) {
        let count = Rc::new(Cell::new(0));
        let count_clone = count.clone();
        let render = engine.register_render(move || {
            count_clone.set(count_clone.get() + 1);
            Ok(())
        });
        let (reader, log) = engine.track();
        for path in paths {
            let _ = reader.get_path(path);
        }
        engine.subscribe(render, &log);
        (render, count)
    }

    #[test]
    fn test_idempotent_write_records_nothing() {
        let (engine, frames, root) = engine_with(json!({"n": 1, "s": "x"}));

        assert!(!root.set("n", 1));
        assert!(!root.set("s", "x"));
        assert!(engine.pending_changes().is_empty());
        assert!(!engine.is_frame_pending());
        assert_eq!(frames.pending(), 0);
    }

    #[test]
    fn test_path_completeness() {
        let (engine, frames, root) = engine_with(json!({"a": {"b": 1}}));
        let (render, count) = counting_render(&engine, &["a.b"]);

        assert!(engine.subscriptions(render).contains(&"a.b".to_string()));

        root.at("a").unwrap().set("b", 2);
        frames.run_frame();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_hierarchical_notification() {
        let (engine, frames, root) = engine_with(json!({"user": {"name": "ada"}}));
        let (_, parent_count) = counting_render(&engine, &["user"]);
        let (_, leaf_count) = counting_render(&engine, &["user.name"]);

        root.at("user").unwrap().set("name", "grace");
        frames.run_frame();
        assert_eq!(parent_count.get(), 1);
        assert_eq!(leaf_count.get(), 1);

        root.set("user", Value::from(json!({"name": "linus"})));
        frames.run_frame();
        assert_eq!(parent_count.get(), 2);
        assert_eq!(leaf_count.get(), 2);
    }

    #[test]
    fn test_batch_coalescing() {
        let (engine, frames, root) = engine_with(json!({"a": 0, "b": 0, "c": 0}));
        let (_, count) = counting_render(&engine, &["a", "b", "c"]);

        root.set("a", 1);
        root.set("b", 2);
        root.set("c", 3);

        assert_eq!(engine.pending_changes().len(), 3);
        assert_eq!(frames.pending(), 1);
        frames.run_frame();

        assert_eq!(count.get(), 1);
        assert_eq!(engine.stats().dispatch_passes, 1);
        assert!(engine.pending_changes().is_empty());
    }

    #[test]
    fn test_sequence_writes_report_sequence_path() {
        let (engine, _frames, root) = engine_with(json!({"todos": ["a", "b"]}));
        let todos = root.at("todos").unwrap();

        todos.set(1, "c");
        todos.push("d");
        let paths: Vec<String> = engine.pending_changes().into_iter().map(|c| c.path).collect();
        assert_eq!(paths, vec!["state.todos", "state.todos"]);
    }

    #[test]
    fn test_failing_render_does_not_stop_siblings() {
        let (engine, frames, root) = engine_with(json!({"x": 0}));
        let broken = engine.register_render(|| Err(RenderError::msg("boom")));
        let (reader, log) = engine.track();
        let _ = reader.get("x");
        engine.subscribe(broken, &log);
        let (_, count) = counting_render(&engine, &["x"]);

        root.set("x", 1);
        frames.run_frame();

        assert_eq!(count.get(), 1);
        assert_eq!(engine.diagnostics().total(), 1);
        assert!(matches!(
            engine.diagnostics().recent()[0],
            Fault::RenderFailed { .. }
        ));
    }

    #[test]
    fn test_teardown_cancels_pending_frame() {
        let (engine, frames, root) = engine_with(json!({"x": 0}));
        let (_, count) = counting_render(&engine, &["x"]);

        root.set("x", 1);
        assert!(engine.is_frame_pending());
        engine.teardown();

        assert!(!engine.is_frame_pending());
        assert_eq!(frames.run_frame(), 0);
        assert_eq!(count.get(), 0);
    }

    #[test]
    fn test_reset_cancels_and_rewraps() {
        let (engine, frames, root) = engine_with(json!({"x": 0}));
        let (_, count) = counting_render(&engine, &["x"]);

        root.set("x", 1);
        let fresh = engine.reset(Value::from(json!({"x": 5})));
        assert_eq!(frames.run_frame(), 0);
        assert_eq!(count.get(), 0);

        fresh.set("x", 6);
        frames.run_frame();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_write_during_dispatch_schedules_next_frame() {
        let (engine, frames, root) = engine_with(json!({"a": 0, "b": 0}));
        let writer = root.clone();
        let echo = engine.register_render(move || {
            writer.set("b", 1);
            Ok(())
        });
        let (reader, log) = engine.track();
        let _ = reader.get("a");
        engine.subscribe(echo, &log);
        let (_, b_count) = counting_render(&engine, &["b"]);

        root.set("a", 1);
        frames.run_frame();
        assert_eq!(b_count.get(), 0);
        assert_eq!(frames.pending(), 1);

        frames.run_frame();
        assert_eq!(b_count.get(), 1);
    }

    #[test]
    fn test_flush_dispatches_immediately() {
        let (engine, frames, root) = engine_with(json!({"x": 0}));
        let (_, count) = counting_render(&engine, &["x"]);

        root.set("x", 1);
        assert_eq!(engine.flush(), 1);
        assert_eq!(count.get(), 1);
        assert_eq!(frames.run_frame(), 0);
    }

    #[test]
    fn test_run_render_during_pass_runs_once() {
        let (engine, frames, root) = engine_with(json!({"x": 0}));
        let (child, child_count) = counting_render(&engine, &["x"]);

        // Registered after the child, so the child is already in the pass
        // when the parent asks for it
        let handle = engine.clone();
        let parent = engine.register_render(move || {
            assert!(handle.run_render(child));
            Ok(())
        });
        let (reader, log) = engine.track();
        let _ = reader.get("x");
        engine.subscribe(parent, &log);

        root.set("x", 1);
        frames.run_frame();
        assert_eq!(child_count.get(), 1);
    }

    #[test]
    fn test_run_render_during_pass_joins_the_pass() {
        let (engine, frames, root) = engine_with(json!({"x": 0, "y": 0}));
        let (late, late_count) = counting_render(&engine, &["y"]);

        let handle = engine.clone();
        let (_, parent_count) = counting_render(&engine, &["x"]);
        let trigger = engine.register_render(move || {
            handle.run_render(late);
            handle.run_render(late);
            Ok(())
        });
        let (reader, log) = engine.track();
        let _ = reader.get("x");
        engine.subscribe(trigger, &log);

        root.set("x", 1);
        frames.run_frame();
        assert_eq!(parent_count.get(), 1);
        assert_eq!(late_count.get(), 1);

        // Outside a pass the render runs immediately
        assert!(engine.run_render(late));
        assert_eq!(late_count.get(), 2);
    }

    #[test]
    fn test_dispose_render_unsubscribes() {
        let (engine, frames, root) = engine_with(json!({"x": 0}));
        let (render, count) = counting_render(&engine, &["x"]);

        engine.dispose_render(render);
        root.set("x", 1);
        frames.run_frame();
        assert_eq!(count.get(), 0);
        assert_eq!(engine.stats().subscriptions, 0);
    }
}
