//! Lifecycle glue: wires the patch engine, command builder, renderer, bridge
//! and context tracker into one object the host bootstrap drives.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bridge::{BridgeStats, EventLoopBridge};
use crate::commands::{build, resolve_startup, BuildOptions, CommandId, CommandProvider, ProviderRegistry};
use crate::config::{BridgeConfig, MenuConfig};
use crate::context::{Context, ContextCell, ContextSnapshot, ContextTracker};
use crate::error::IntegrationFailure;
use crate::host::{HostModuleSource, HostNamespace, MenuLayout, MenuOpenHandler, NativeDraw, TimerRegistrar};
use crate::patch::{HostMenuSite, PatchEngine, PatchResult};
use crate::renderer::{ExternalOpener, MenuEvent, MenuRenderer, RendererInbox};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuAvailability {
    /// The hook call lives in the host's menu-bar routine.
    Injected,
    /// Registered through the host's append-extension point.
    Extension,
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupReport {
    pub patch: PatchResult,
    pub menu: MenuAvailability,
    pub bridge_running: bool,
}

/// Rebuilds the tree for a context and hands it to the renderer.
#[derive(Clone)]
struct Rebuilder {
    providers: Rc<RefCell<ProviderRegistry>>,
    renderer: Rc<RefCell<MenuRenderer>>,
    inbox: RendererInbox,
    options: BuildOptions,
    disabled: Rc<RefCell<Option<String>>>,
}

impl Rebuilder {
    fn refresh(&self, context: &Context) {
        match self.disabled.borrow().as_ref() {
            Some(reason) => self.inbox.park_disabled(reason.clone()),
            None => {
                let Ok(providers) = self.providers.try_borrow() else {
                    warn!("[engine] provider registry busy; menu not rebuilt");
                    return;
                };
                let tree = build(context, &providers, &self.options);
                self.inbox.park_tree(tree);
            }
        }
        match self.renderer.try_borrow_mut() {
            Ok(mut renderer) => renderer.apply_parked(),
            Err(_) => debug!("[engine] renderer busy; render parked for next dispatch"),
        }
    }
}

pub struct PipelineEngine {
    config: BridgeConfig,
    tracker: Rc<ContextTracker>,
    providers: Rc<RefCell<ProviderRegistry>>,
    renderer: Rc<RefCell<MenuRenderer>>,
    inbox: RendererInbox,
    bridge: EventLoopBridge<MenuRenderer>,
    patcher: PatchEngine,
    rebuilder: Rebuilder,
    report: Option<StartupReport>,
    /// Cleared on shutdown; the host-side hook and open handler check it.
    live: Rc<Cell<bool>>,
    extension: Option<NativeDraw>,
    shut_down: bool,
}

impl PipelineEngine {
    pub fn new(config: BridgeConfig, bootstrap_context: Context) -> Self {
        let inbox = RendererInbox::default();
        let renderer = MenuRenderer::new(inbox.clone());
        Self::with_renderer(config, bootstrap_context, renderer)
    }

    /// Uses `opener` for "Jump to Site" and "Jump to File System" instead of
    /// the desktop handler.
    pub fn with_opener(config: BridgeConfig, bootstrap_context: Context, opener: ExternalOpener) -> Self {
        let inbox = RendererInbox::default();
        let renderer = MenuRenderer::with_opener(inbox.clone(), opener);
        Self::with_renderer(config, bootstrap_context, renderer)
    }

    fn with_renderer(config: BridgeConfig, bootstrap_context: Context, renderer: MenuRenderer) -> Self {
        let inbox = renderer.inbox().clone();
        let renderer = Rc::new(RefCell::new(renderer));
        let providers = Rc::new(RefCell::new(ProviderRegistry::new()));
        let tracker = Rc::new(ContextTracker::new(bootstrap_context));
        let rebuilder = Rebuilder {
            providers: providers.clone(),
            renderer: renderer.clone(),
            inbox: inbox.clone(),
            options: BuildOptions { favorites: config.menu.favorites.clone() },
            disabled: Rc::new(RefCell::new(None)),
        };
        let listener = rebuilder.clone();
        tracker.subscribe(Rc::new(move |snapshot: &Arc<ContextSnapshot>| listener.refresh(&snapshot.context)));
        let bridge = EventLoopBridge::new(renderer.clone());
        let patcher = PatchEngine::new(config.menu.hook_name.clone());
        Self {
            config,
            tracker,
            providers,
            renderer,
            inbox,
            bridge,
            patcher,
            rebuilder,
            report: None,
            live: Rc::new(Cell::new(true)),
            extension: None,
            shut_down: false,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn register_provider(&mut self, provider: Rc<dyn CommandProvider>) -> Result<()> {
        if self.report.is_some() {
            warn!(provider = provider.name(), "[engine] provider registered after startup");
        }
        self.providers.borrow_mut().register(provider)
    }

    pub fn startup(
        &mut self,
        namespace: &mut HostNamespace,
        source: &HostModuleSource,
        registrar: &Rc<dyn TimerRegistrar>,
    ) -> StartupReport {
        if let Some(report) = self.report {
            debug!("[engine] startup already ran");
            return report;
        }
        let menu = &self.config.menu;
        let entry = menu_entry(menu, self.live.clone());
        namespace.register_function(&menu.hook_name, entry);

        let cell = self.tracker.cell();
        let inbox = self.inbox.clone();
        let live = self.live.clone();
        let draw: NativeDraw = Rc::new(move |layout: &MenuLayout| context_header(&cell, layout));
        let on_open: MenuOpenHandler = Rc::new(move |at: Option<[f32; 2]>| {
            if live.get() {
                inbox.push(MenuEvent::Open { at });
            }
        });
        let registered = namespace.register_native_class(&menu.class_id, &menu.label, draw, Some(on_open));
        if let Err(err) = registered {
            warn!(class = %menu.class_id, "[engine] pipeline menu class not registered: {err}");
        }

        let patch = self.patcher.install(namespace, source, &menu.anchor);
        let availability = if patch.is_installed() {
            MenuAvailability::Injected
        } else if patch == PatchResult::AnchorNotFound && menu.allow_extension_fallback {
            let entry = menu_entry(menu, self.live.clone());
            let extension: NativeDraw = Rc::new(move |layout: &MenuLayout| -> Result<()> {
                entry(layout);
                Ok(())
            });
            match namespace.append_extension(&menu.fallback_class, extension.clone()) {
                Ok(()) => {
                    self.extension = Some(extension);
                    info!(class = %menu.fallback_class, "[engine] pipeline menu appended through host extension point");
                    MenuAvailability::Extension
                }
                Err(err) => {
                    warn!(
                        failure = %IntegrationFailure::AnchorNotFound,
                        class = %menu.fallback_class,
                        "[engine] extension fallback unavailable: {err}"
                    );
                    MenuAvailability::Unavailable
                }
            }
        } else {
            MenuAvailability::Unavailable
        };

        let snapshot = self.tracker.current();
        self.rebuilder.refresh(&snapshot.context);
        self.queue_startup_commands();

        if let Err(err) = self.bridge.start(registrar.clone(), self.config.bridge.tick_interval()) {
            debug!("[engine] {err}");
        }
        let bridge_running = self.bridge.is_running();
        let report = StartupReport { patch, menu: availability, bridge_running };
        info!(
            patch = %report.patch,
            menu = ?report.menu,
            bridge_running,
            context = %snapshot.context,
            "[engine] pipeline menu started"
        );
        self.report = Some(report);
        report
    }

    /// Queues the configured `run_at_startup` commands; the bridge runs them
    /// on its first tick.
    fn queue_startup_commands(&self) {
        let requests = &self.config.menu.run_at_startup;
        if requests.is_empty() {
            return;
        }
        let ids = match self.renderer.try_borrow() {
            Ok(renderer) => resolve_startup(renderer.tree(), requests),
            Err(_) => {
                warn!("[engine] renderer busy; startup commands skipped");
                return;
            }
        };
        for id in ids {
            info!(command = %id, "[engine] queued startup command");
            self.inbox.push(MenuEvent::Activate(id));
        }
    }

    pub fn startup_report(&self) -> Option<StartupReport> {
        self.report
    }

    pub fn patch_site(&self) -> Option<&HostMenuSite> {
        self.patcher.site()
    }

    /// Queues the menu to open at `at` (host window coordinates).
    pub fn display_menu(&self, at: Option<[f32; 2]>) {
        self.inbox.push(MenuEvent::Open { at });
    }

    pub fn close_menu(&self) {
        self.inbox.push(MenuEvent::Close);
    }

    pub fn activate(&self, id: impl Into<String>) {
        self.inbox.push(MenuEvent::Activate(CommandId::new(id)));
    }

    pub fn send_input(&self, event: egui::Event) {
        self.inbox.push(MenuEvent::Input(event));
    }

    pub fn on_context_changed(&self, context: Context) {
        self.tracker.on_context_changed(context);
    }

    /// Replaces the menu with a single disabled notice until `set_enabled`.
    pub fn set_disabled(&self, reason: impl Into<String>) {
        *self.rebuilder.disabled.borrow_mut() = Some(reason.into());
        self.rebuilder.refresh(&self.tracker.current().context);
    }

    pub fn set_enabled(&self) {
        *self.rebuilder.disabled.borrow_mut() = None;
        self.rebuilder.refresh(&self.tracker.current().context);
    }

    /// The host is closing; the bridge stops itself on its next tick.
    pub fn request_host_shutdown(&self) {
        self.inbox.request_shutdown();
    }

    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.live.set(false);
        self.bridge.stop();
        self.tracker.clear_listeners();
        let removed = {
            let mut providers = self.providers.borrow_mut();
            let count = providers.len();
            providers.clear();
            count
        };
        info!(providers = removed, stats = ?self.bridge.stats(), "[engine] pipeline menu shut down");
    }

    /// Shuts down and removes everything startup registered with the host:
    /// the pipeline menu class and the fallback extension. The hook function
    /// stays registered, since the patched routine still calls it, but draws
    /// nothing.
    pub fn unregister(&mut self, namespace: &mut HostNamespace) {
        self.shutdown();
        let menu = &self.config.menu;
        let removed_class = namespace.unregister_class(&menu.class_id);
        let removed_extension = match self.extension.take() {
            Some(extension) => namespace.remove_extension(&menu.fallback_class, &extension),
            None => false,
        };
        info!(class = %menu.class_id, removed_class, removed_extension, "[engine] pipeline menu unregistered");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    pub fn tracker(&self) -> &ContextTracker {
        &self.tracker
    }

    pub fn context(&self) -> Arc<ContextSnapshot> {
        self.tracker.current()
    }

    pub fn renderer(&self) -> &Rc<RefCell<MenuRenderer>> {
        &self.renderer
    }

    pub fn bridge(&self) -> &EventLoopBridge<MenuRenderer> {
        &self.bridge
    }

    pub fn bridge_stats(&self) -> BridgeStats {
        self.bridge.stats()
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.borrow().names()
    }
}

impl fmt::Debug for PipelineEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineEngine")
            .field("report", &self.report)
            .field("bridge", &self.bridge.state())
            .field("shut_down", &self.shut_down)
            .finish_non_exhaustive()
    }
}

impl Drop for PipelineEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Host-side draw of the pipeline entry in the menu bar.
fn menu_entry(menu: &MenuConfig, live: Rc<Cell<bool>>) -> Rc<dyn Fn(&MenuLayout)> {
    let class_id = menu.class_id.clone();
    let label = menu.label.clone();
    let icon = menu.icon.clone();
    Rc::new(move |layout: &MenuLayout| {
        if live.get() {
            layout.push_menu_with(&class_id, Some(&label), icon.as_deref());
        }
    })
}

fn context_header(cell: &ContextCell, layout: &MenuLayout) -> Result<()> {
    let snapshot = cell.load();
    layout.push_label(&snapshot.context.label());
    Ok(())
}
