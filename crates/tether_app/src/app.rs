//! Tether application host
//!
//! Owns the engine, the document, and the component instances, and wires a
//! render of each instance as: component logic, then bindings, then
//! subscription of everything the render read.

use std::cell::{Cell, Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tether_core::{
    ConfigError, Diagnostics, Engine, EngineConfig, Fault, FrameHost, FrameQueue, RenderError,
    RenderId, RenderResult, Value, Writer,
};
use tether_dom::{attrs, Binder, Document, NodeId, Scope};
use tracing::{debug, info};

use crate::component::{noop_render, Component, Components, Detail, RenderFn};
use crate::context::{HandlerContext, RenderContext};
use crate::error::{AppError, Result};
use crate::logging::init_logging;

/// Application configuration
///
/// ```toml
/// log_filter = "tether_core=debug"
/// mount_on_init = true
///
/// [engine]
/// root_segment = "state"
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    /// Install a tracing subscriber with this filter at startup
    #[serde(default)]
    pub log_filter: Option<String>,
    /// Mount registered component hosts found in loaded markup
    #[serde(default = "default_mount_on_init")]
    pub mount_on_init: bool,
}

fn default_mount_on_init() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            log_filter: None,
            mount_on_init: default_mount_on_init(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(source: &str) -> std::result::Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.engine.validate()
    }
}

// =============================================================================
// RUNTIME
// =============================================================================

struct Instance {
    render: RenderId,
    component: Option<Rc<dyn Component>>,
    detail: Rc<Detail>,
}

/// State shared between the app and its render callbacks
///
/// Callbacks hold it weakly; the engine owns the callbacks.
struct Runtime {
    engine: Engine,
    doc: RefCell<Document>,
    binder: Binder,
    components: Components,
    instances: RefCell<FxHashMap<NodeId, Instance>>,
    counters: RefCell<FxHashMap<String, usize>>,
}

impl Runtime {
    fn create_instance(
        self: &Rc<Self>,
        element: NodeId,
        detail: Detail,
        render: RenderFn,
        component: Option<Rc<dyn Component>>,
    ) -> Render {
        let detail = Rc::new(detail);
        let slot = Rc::new(Cell::new(RenderId::default()));
        let renders = Rc::new(Cell::new(0u64));
        let weak = Rc::downgrade(self);

        let callback = {
            let slot = slot.clone();
            let detail = detail.clone();
            let weak = weak.clone();
            move || -> RenderResult {
                match weak.upgrade() {
                    Some(runtime) => {
                        runtime.render_instance(slot.get(), element, &detail, &render, &renders)
                    }
                    None => Ok(()),
                }
            }
        };
        let id = self.engine.register_render(callback);
        slot.set(id);

        let previous = self.instances.borrow_mut().insert(
            element,
            Instance {
                render: id,
                component,
                detail,
            },
        );
        if let Some(previous) = previous {
            self.engine.dispose_render(previous.render);
        }

        Render {
            id,
            element,
            runtime: weak,
        }
    }

    fn render_instance(
        self: &Rc<Self>,
        id: RenderId,
        element: NodeId,
        detail: &Detail,
        render: &RenderFn,
        renders: &Cell<u64>,
    ) -> RenderResult {
        let (reader, log) = self.engine.track();

        let (result, report) = {
            let mut doc = self
                .doc
                .try_borrow_mut()
                .map_err(|_| RenderError::msg("document is borrowed"))?;
            if !doc.contains(element) {
                return Ok(());
            }

            let result = {
                let mut cx = RenderContext::new(&reader, &mut doc, element, detail, renders.get());
                render(&mut cx)
            };
            let report = result.is_ok().then(|| {
                let mut scope = Scope::new(reader.clone());
                if !detail.data.is_null() {
                    scope = scope.with_detail(detail.data.clone());
                }
                self.binder.apply_bindings(&mut doc, element, &scope)
            });
            (result, report)
        };

        if result.is_ok() {
            renders.set(renders.get() + 1);
        }
        self.engine.subscribe(id, &log);

        if let Some(report) = report {
            self.sync_instances(element, &report.args_changed);
        }
        result
    }

    /// Reconcile instances with the tree after a render changed it
    fn sync_instances(self: &Rc<Self>, element: NodeId, args_changed: &[NodeId]) {
        self.prune();
        let mounted = self.mount_within(element);

        for node in args_changed {
            if mounted.iter().any(|render| render.element == *node) {
                continue;
            }
            let render = self.instances.borrow().get(node).map(|i| i.render);
            if let Some(render) = render {
                debug!(?node, "args changed, re-rendering component");
                self.engine.run_render(render);
            }
        }
    }

    /// Dispose instances whose element left the tree
    fn prune(&self) {
        let gone: Vec<(NodeId, RenderId)> = {
            let Ok(doc) = self.doc.try_borrow() else {
                return;
            };
            let instances = self.instances.borrow();
            instances
                .iter()
                .filter(|(node, _)| !doc.contains(**node))
                .map(|(node, instance)| (*node, instance.render))
                .collect()
        };
        for (node, render) in gone {
            self.instances.borrow_mut().remove(&node);
            self.engine.dispose_render(render);
            debug!(?node, "disposed component instance");
        }
    }

    /// Mount registered hosts strictly below `root`, in tree order
    fn mount_within(self: &Rc<Self>, root: NodeId) -> Vec<Render> {
        let hosts: Vec<(NodeId, Rc<dyn Component>, String)> = {
            let Ok(doc) = self.doc.try_borrow() else {
                return Vec::new();
            };
            let instances = self.instances.borrow();
            doc.descendants(root)
                .into_iter()
                .filter(|node| *node != root && !instances.contains_key(node))
                .filter(|node| !in_template(&doc, *node))
                .filter_map(|node| {
                    let tag = doc.tag(node)?;
                    let component = self.components.get(tag)?;
                    Some((node, component, tag.to_string()))
                })
                .collect()
        };

        let mut mounted = Vec::new();
        for (node, component, tag) in hosts {
            // An earlier mount may have rendered or removed this host already.
            let live = self.doc.try_borrow().is_ok_and(|doc| doc.contains(node));
            if !live || self.instances.borrow().contains_key(&node) {
                continue;
            }
            mounted.push(self.mount_component(node, component, &tag, Value::Null));
        }
        mounted
    }

    fn mount_component(
        self: &Rc<Self>,
        element: NodeId,
        component: Rc<dyn Component>,
        tag: &str,
        data: Value,
    ) -> Render {
        let index = {
            let mut counters = self.counters.borrow_mut();
            let next = counters.entry(tag.to_string()).or_insert(0);
            let index = *next;
            *next += 1;
            index
        };
        let detail = Detail::new(tag, index).with_data(data);

        let render = match component.setup(&detail) {
            Ok(render) => render,
            Err(err) => {
                self.engine.diagnostics().report(Fault::ComponentSetup {
                    tag: tag.to_string(),
                    message: err.to_string(),
                });
                noop_render()
            }
        };

        let handle = self.create_instance(element, detail, render, Some(component));
        debug!(tag, index, "mounted component");
        handle.invoke();
        handle
    }

    fn handle_for(self: &Rc<Self>, element: NodeId) -> Option<Render> {
        let id = self.instances.borrow().get(&element)?.render;
        Some(Render {
            id,
            element,
            runtime: Rc::downgrade(self),
        })
    }

    fn dispose_all(&self) {
        let instances: Vec<RenderId> = self
            .instances
            .borrow_mut()
            .drain()
            .map(|(_, instance)| instance.render)
            .collect();
        for render in instances {
            self.engine.dispose_render(render);
        }
        self.counters.borrow_mut().clear();
    }
}

fn in_template(doc: &Document, node: NodeId) -> bool {
    doc.ancestors(node)
        .skip(1)
        .any(|n| doc.tag(n) == Some(attrs::TEMPLATE_TAG))
}

// =============================================================================
// RENDER HANDLE
// =============================================================================

/// Invokes one component instance's render
#[derive(Clone, Debug)]
pub struct Render {
    id: RenderId,
    element: NodeId,
    runtime: Weak<Runtime>,
}

impl Render {
    /// Perform one render now
    ///
    /// Returns `false` if the instance no longer exists. A failing render is
    /// reported, not returned.
    pub fn invoke(&self) -> bool {
        match self.runtime.upgrade() {
            Some(runtime) => runtime.engine.run_render(self.id),
            None => false,
        }
    }

    pub fn id(&self) -> RenderId {
        self.id
    }

    pub fn element(&self) -> NodeId {
        self.element
    }
}

// =============================================================================
// APP
// =============================================================================

/// A Tether application
pub struct App {
    runtime: Rc<Runtime>,
    state: Writer,
    frames: Option<Rc<FrameQueue>>,
    config: AppConfig,
}

impl App {
    /// Create an app with the default configuration and an in-process frame
    /// queue driven by [`App::tick`]
    ///
    /// A missing or non-container `state` starts as an empty record.
    pub fn new(state: Option<Value>, components: Components) -> Self {
        let config = AppConfig::default();
        let (engine, frames) = Engine::with_frame_queue(config.engine.clone());
        Self::assemble(config, engine, Some(frames), state, components)
    }

    pub fn with_config(
        config: AppConfig,
        state: Option<Value>,
        components: Components,
    ) -> Result<Self> {
        config.validate()?;
        if let Some(filter) = &config.log_filter {
            init_logging(filter);
        }
        let (engine, frames) = Engine::with_frame_queue(config.engine.clone());
        Ok(Self::assemble(config, engine, Some(frames), state, components))
    }

    /// Create an app whose frames are driven by the host
    pub fn with_frame_host(
        config: AppConfig,
        host: Rc<dyn FrameHost>,
        state: Option<Value>,
        components: Components,
    ) -> Result<Self> {
        config.validate()?;
        if let Some(filter) = &config.log_filter {
            init_logging(filter);
        }
        let engine = Engine::new(config.engine.clone(), host);
        Ok(Self::assemble(config, engine, None, state, components))
    }

    fn assemble(
        config: AppConfig,
        engine: Engine,
        frames: Option<Rc<FrameQueue>>,
        state: Option<Value>,
        components: Components,
    ) -> Self {
        let state = engine.wrap(state.unwrap_or(Value::Null));
        let binder = Binder::new(engine.diagnostics().clone());
        info!(components = components.len(), "tether app initialized");

        Self {
            runtime: Rc::new(Runtime {
                engine,
                doc: RefCell::new(Document::new()),
                binder,
                components,
                instances: RefCell::new(FxHashMap::default()),
                counters: RefCell::new(FxHashMap::default()),
            }),
            state,
            frames,
            config,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.runtime.engine
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        self.runtime.engine.diagnostics()
    }

    pub fn binder(&self) -> &Binder {
        &self.runtime.binder
    }

    /// Live, wrapped state
    pub fn state(&self) -> Writer {
        self.state.clone()
    }

    /// JSON copy of the current state
    pub fn snapshot(&self) -> serde_json::Value {
        self.runtime.engine.root_value().to_json()
    }

    /// Replace the whole state graph and re-render every instance
    pub fn replace_state(&mut self, state: Value) -> Writer {
        self.state = self.runtime.engine.reset(state);
        let renders: Vec<RenderId> = self
            .runtime
            .instances
            .borrow()
            .values()
            .map(|instance| instance.render)
            .collect();
        for render in renders {
            self.runtime.engine.run_render(render);
        }
        self.state.clone()
    }

    // =========================================================================
    // DOCUMENT
    // =========================================================================

    pub fn document(&self) -> Ref<'_, Document> {
        self.runtime.doc.borrow()
    }

    pub fn document_mut(&self) -> RefMut<'_, Document> {
        self.runtime.doc.borrow_mut()
    }

    /// Serialized document
    pub fn html(&self) -> String {
        self.runtime.doc.borrow().html()
    }

    /// Append markup under the document root
    ///
    /// With `mount_on_init`, registered component hosts in the new content
    /// are mounted and rendered.
    pub fn load(&self, markup: &str) -> Result<Vec<NodeId>> {
        let nodes = {
            let mut doc = self.runtime.doc.try_borrow_mut()?;
            let root = doc.root();
            doc.append_markup(root, markup)?
        };
        if self.config.mount_on_init {
            for node in &nodes {
                self.mount_all(*node);
            }
        }
        Ok(nodes)
    }

    // =========================================================================
    // COMPONENTS
    // =========================================================================

    /// Register a render for `element` without a [`Component`]
    ///
    /// The returned handle is not invoked; call [`Render::invoke`] for the
    /// initial render.
    pub fn component<F>(&self, element: NodeId, detail: Detail, render: F) -> Result<Render>
    where
        F: Fn(&mut RenderContext<'_>) -> RenderResult + 'static,
    {
        self.ensure_element(element)?;
        Ok(self
            .runtime
            .create_instance(element, detail, Rc::new(render), None))
    }

    /// Mount the component registered for `element`'s tag and render it
    ///
    /// Mounting an already-mounted element returns its existing handle.
    pub fn mount(&self, element: NodeId, data: impl Into<Value>) -> Result<Render> {
        self.ensure_element(element)?;
        if let Some(render) = self.runtime.handle_for(element) {
            return Ok(render);
        }

        let tag = self
            .runtime
            .doc
            .try_borrow()
            .map_err(|err| AppError::DocumentBusy(err.to_string()))?
            .tag(element)
            .map(String::from)
            .ok_or(AppError::UnknownNode(element))?;
        let component = self
            .runtime
            .components
            .get(&tag)
            .ok_or_else(|| AppError::UnknownComponent { tag: tag.clone() })?;

        Ok(self
            .runtime
            .mount_component(element, component, &tag, data.into()))
    }

    /// Mount every registered host at or below `root`, parents first
    pub fn mount_all(&self, root: NodeId) -> Vec<Render> {
        let mut mounted = Vec::new();
        let registered = self
            .runtime
            .doc
            .try_borrow()
            .ok()
            .and_then(|doc| doc.tag(root).map(|tag| self.runtime.components.contains(tag)))
            .unwrap_or(false);
        if registered && self.runtime.handle_for(root).is_none() {
            if let Ok(render) = self.mount(root, Value::Null) {
                mounted.push(render);
            }
        }
        mounted.extend(self.runtime.mount_within(root));
        mounted
    }

    /// Render handle of a mounted element
    pub fn render_for(&self, element: NodeId) -> Option<Render> {
        self.runtime.handle_for(element)
    }

    pub fn instance_count(&self) -> usize {
        self.runtime.instances.borrow().len()
    }

    // =========================================================================
    // FRAMES
    // =========================================================================

    /// Run one frame of the in-process queue; returns the callbacks run
    ///
    /// Always zero for apps driven by a host [`FrameHost`].
    pub fn tick(&self) -> usize {
        self.frames.as_ref().map_or(0, |frames| frames.run_frame())
    }

    /// Run frames until none are pending, up to `max_frames`
    pub fn run_until_idle(&self, max_frames: usize) -> usize {
        self.frames
            .as_ref()
            .map_or(0, |frames| frames.run_until_idle(max_frames))
    }

    /// Dispatch pending changes now, without waiting for a frame
    pub fn flush(&self) -> usize {
        self.runtime.engine.flush()
    }

    // =========================================================================
    // INPUT
    // =========================================================================

    /// Set a form element's value as if the user typed it, and write it back
    /// through its `data-value` binding
    pub fn input(&self, node: NodeId, text: &str) -> Result<bool> {
        let mut doc = self.runtime.doc.try_borrow_mut()?;
        if !doc.is_element(node) {
            return Err(AppError::UnknownNode(node));
        }
        doc.set_value(node, text);
        Ok(self.runtime.binder.write_back(&doc, node, &self.state))
    }

    /// Set a checkbox or radio and write it back through `data-checked`
    pub fn toggle(&self, node: NodeId, checked: bool) -> Result<bool> {
        let mut doc = self.runtime.doc.try_borrow_mut()?;
        if !doc.is_element(node) {
            return Err(AppError::UnknownNode(node));
        }
        doc.set_checked(node, checked);
        Ok(self.runtime.binder.write_back(&doc, node, &self.state))
    }

    /// Route an event to the component instance that owns `node`
    ///
    /// Returns `false` when no ancestor instance has a [`Component`].
    pub fn emit(&self, node: NodeId, event: &str, payload: impl Into<Value>) -> Result<bool> {
        let owner = {
            let doc = self
                .runtime
                .doc
                .try_borrow()
                .map_err(|err| AppError::DocumentBusy(err.to_string()))?;
            if !doc.contains(node) {
                return Err(AppError::UnknownNode(node));
            }
            let instances = self.runtime.instances.borrow();
            let owner = doc.ancestors(node).find_map(|n| {
                let instance = instances.get(&n)?;
                let component = instance.component.clone()?;
                Some((n, component, instance.detail.clone()))
            });
            owner
        };
        let Some((host, component, detail)) = owner else {
            debug!(event, ?node, "event has no owning component");
            return Ok(false);
        };

        let mut doc = self.runtime.doc.try_borrow_mut()?;
        let mut cx = HandlerContext::new(
            self.state.clone(),
            &mut doc,
            host,
            node,
            event,
            payload.into(),
            &detail,
        );
        component
            .handle(&mut cx)
            .map_err(|source| AppError::Handler {
                tag: detail.tag.clone(),
                source,
            })?;
        Ok(true)
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Cancel any pending frame and drop every render and subscription
    ///
    /// The document is left as last rendered.
    pub fn teardown(&self) {
        self.runtime.dispose_all();
        self.runtime.engine.teardown();
        info!("tether app torn down");
    }

    fn ensure_element(&self, element: NodeId) -> Result<()> {
        let doc = self
            .runtime
            .doc
            .try_borrow()
            .map_err(|err| AppError::DocumentBusy(err.to_string()))?;
        if doc.is_element(element) {
            Ok(())
        } else {
            Err(AppError::UnknownNode(element))
        }
    }
}
