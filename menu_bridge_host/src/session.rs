//! Headless host session: a scripted top bar, a frame-driven timer table and
//! the pipeline engine wired together the way an application would.

use anyhow::{Context as _, Result};
use menu_bridge::bridge::BridgeStats;
use menu_bridge::config::BridgeConfig;
use menu_bridge::context::Context;
use menu_bridge::engine::{MenuAvailability, PipelineEngine};
use menu_bridge::host::{HostNamespace, HostTimers, LayoutItem, TimerRegistrar};
use serde::Serialize;
use std::cell::RefCell;
use std::rc::Rc;
use tracing::info;

use crate::providers::{demo_providers, ActivityLog};

pub const HOST_VERSION: &str = "4.1.0";
pub const TOPBAR_MODULE: &str = "space_topbar";
pub const EDITOR_MENUS: &str = "TOPBAR_MT_editor_menus";
pub const DEFAULT_FRAMES: u32 = 8;

const TOPBAR_SOURCE: &str = include_str!("../../assets/host/topbar.rhai");

#[derive(Debug, Clone, Serialize)]
pub struct MenuSnapshot {
    pub frame: u32,
    pub context: String,
    pub entries: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct BridgeSummary {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub processed: u64,
    pub dropped: u64,
    pub posted_run: u64,
    pub posted_failures: u64,
}

impl From<BridgeStats> for BridgeSummary {
    fn from(stats: BridgeStats) -> Self {
        Self {
            ticks: stats.ticks,
            skipped_ticks: stats.skipped_ticks,
            processed: stats.processed,
            dropped: stats.dropped,
            posted_run: stats.posted_run,
            posted_failures: stats.posted_failures,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub host_version: String,
    pub patch: String,
    pub menu: MenuAvailability,
    pub hook_site: Option<String>,
    pub top_bar: Vec<String>,
    pub menus: Vec<MenuSnapshot>,
    pub activity: Vec<String>,
    pub frames: u32,
    pub bridge: BridgeSummary,
    pub timers_left: usize,
}

/// What the simulated user does on a given frame.
enum Action {
    Open,
    Activate(&'static str),
    SwitchContext(Context),
    Idle,
}

fn script(frame: u32) -> Action {
    match frame {
        1 => Action::Open,
        2 => Action::Activate("workfiles.open"),
        3 => Action::SwitchContext(Context::new("projectA").with_entity("asset", "assetY").with_task("modeling")),
        4 => Action::Open,
        5 => Action::Activate("loader.load"),
        _ => Action::Idle,
    }
}

fn menu_ids(items: &[LayoutItem]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| match item {
            LayoutItem::Menu { id, .. } => Some(id.clone()),
            _ => None,
        })
        .collect()
}

pub fn default_context() -> Context {
    Context::new("projectA").with_entity("shot", "shot010").with_task("comp")
}

/// Runs `frames` host redraws against a fresh host and returns what happened.
pub fn run_session(config: BridgeConfig, context: Context, frames: u32) -> Result<SessionSummary> {
    let mut namespace = HostNamespace::new(HOST_VERSION);
    namespace.exec(TOPBAR_MODULE, TOPBAR_SOURCE).context("Loading the host top bar")?;
    namespace.register_script_class(EDITOR_MENUS, "", TOPBAR_MODULE, "draw_editor_menus")?;
    let source = namespace
        .module_source(TOPBAR_MODULE)
        .with_context(|| format!("Host module '{TOPBAR_MODULE}' is not loaded"))?;
    let timers = HostTimers::new();
    let registrar: Rc<dyn TimerRegistrar> = Rc::new(timers.clone());

    let activity: ActivityLog = Rc::new(RefCell::new(Vec::new()));
    let opener_log = activity.clone();
    let class_id = config.menu.class_id.clone();
    let mut engine = PipelineEngine::with_opener(
        config,
        context,
        Rc::new(move |target: &str| -> Result<()> {
            opener_log.borrow_mut().push(format!("jump {target}"));
            Ok(())
        }),
    );
    for provider in demo_providers(&activity) {
        engine.register_provider(provider)?;
    }

    let report = engine.startup(&mut namespace, &source, &registrar);
    let hook_site = engine.patch_site().map(|site| format!("{}::{}", site.module, site.function));

    let mut menus = Vec::new();
    let mut top_bar = Vec::new();
    let mut last_version = None;
    for frame in 1..=frames {
        match script(frame) {
            Action::Open => {
                if let Err(err) = namespace.open_menu(&class_id, Some([320.0, 24.0])) {
                    info!(frame, "[host] pipeline menu cannot open: {err}");
                }
            }
            Action::Activate(id) => engine.activate(id),
            Action::SwitchContext(next) => engine.on_context_changed(next),
            Action::Idle => {}
        }
        top_bar = menu_ids(&namespace.draw_menu(EDITOR_MENUS)?);
        timers.run_frame();

        let snapshot = engine.context();
        if last_version != Some(snapshot.version) {
            last_version = Some(snapshot.version);
            menus.push(MenuSnapshot {
                frame,
                context: snapshot.context.label(),
                entries: engine.renderer().borrow().tree().outline(),
            });
        }
    }

    let bridge = BridgeSummary::from(engine.bridge_stats());
    engine.shutdown();
    let summary = SessionSummary {
        host_version: namespace.version().to_string(),
        patch: report.patch.label().to_string(),
        menu: report.menu,
        hook_site,
        top_bar,
        menus,
        activity: activity.borrow().clone(),
        frames,
        bridge,
        timers_left: timers.active(),
    };
    info!(frames, ticks = summary.bridge.ticks, "[host] session finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_session_injects_and_runs_commands() {
        let mut config = BridgeConfig::default();
        config.menu.anchor.id_prefix = Some("TOPBAR_MT_".into());
        config.menu.anchor.insert_before = Some("TOPBAR_MT_help".into());
        let summary = run_session(config, default_context(), DEFAULT_FRAMES).expect("session");

        assert_eq!(summary.patch, "success");
        assert_eq!(summary.menu, MenuAvailability::Injected);
        assert_eq!(summary.hook_site.as_deref(), Some("space_topbar::draw_editor_menus"));
        let pipeline = summary.top_bar.iter().position(|id| id == "TOPBAR_MT_pipeline").expect("pipeline menu");
        let help = summary.top_bar.iter().position(|id| id == "TOPBAR_MT_help").expect("help menu");
        assert_eq!(pipeline + 1, help);

        assert_eq!(summary.menus.len(), 2);
        assert!(summary.menus[1].entries.iter().any(|entry| entry.contains("assetY")));
        assert_eq!(summary.activity, vec!["open in projectA / shot shot010 / comp", "load assetY"]);
        assert_eq!(summary.bridge.ticks, u64::from(DEFAULT_FRAMES));
        assert_eq!(summary.timers_left, 0);
    }
}
