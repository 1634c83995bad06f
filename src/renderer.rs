//! egui rendition of the pipeline menu. The renderer owns an egui context and
//! advances it one queued event at a time when the bridge asks it to.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::path::Path;
use std::process::Command;
use std::rc::Rc;

use anyhow::{Context as _, Result};
use tracing::{debug, trace};

use crate::bridge::{ForeignToolkit, PostedTask};
use crate::commands::{CommandId, CommandTree, MenuCommand, MenuNode};
use crate::error::ToolkitError;

const WINDOW_TITLE: &str = "Pipeline";
pub const JUMP_TO_SITE: &str = "Jump to Site";
pub const JUMP_TO_FILE_SYSTEM: &str = "Jump to File System";

#[derive(Debug, Clone, PartialEq)]
pub enum MenuEvent {
    Open { at: Option<[f32; 2]> },
    Close,
    Input(egui::Event),
    Activate(CommandId),
}

enum RenderRequest {
    Tree(CommandTree),
    Disabled(String),
}

#[derive(Default)]
struct InboxState {
    events: VecDeque<MenuEvent>,
    render: Option<RenderRequest>,
    shutdown: bool,
}

/// Shared entry point into the renderer that never needs the renderer itself
/// to be borrowed.
#[derive(Clone, Default)]
pub struct RendererInbox {
    inner: Rc<RefCell<InboxState>>,
}

impl RendererInbox {
    pub fn push(&self, event: MenuEvent) {
        self.inner.borrow_mut().events.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Parks a tree to be shown from the next dispatch on. Replaces any
    /// earlier parked request.
    pub fn park_tree(&self, tree: CommandTree) {
        self.inner.borrow_mut().render = Some(RenderRequest::Tree(tree));
    }

    pub fn park_disabled(&self, reason: impl Into<String>) {
        self.inner.borrow_mut().render = Some(RenderRequest::Disabled(reason.into()));
    }

    pub fn has_parked_render(&self) -> bool {
        self.inner.borrow().render.is_some()
    }

    pub fn request_shutdown(&self) {
        self.inner.borrow_mut().shutdown = true;
    }

    fn pop(&self) -> Option<MenuEvent> {
        self.inner.borrow_mut().events.pop_front()
    }

    fn take_render(&self) -> Option<RenderRequest> {
        self.inner.borrow_mut().render.take()
    }

    fn shutdown_requested(&self) -> bool {
        self.inner.borrow().shutdown
    }

    fn clear(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.events.clear();
        inner.render = None;
    }
}

/// Opens a URL or a directory with the desktop's default handler.
pub type ExternalOpener = Rc<dyn Fn(&str) -> Result<()>>;

pub fn open_externally(target: &str) -> Result<()> {
    let mut command = if cfg!(target_os = "windows") {
        let mut command = Command::new("cmd.exe");
        command.args(["/C", "start", "", target]);
        command
    } else if cfg!(target_os = "macos") {
        let mut command = Command::new("open");
        command.arg(target);
        command
    } else {
        let mut command = Command::new("xdg-open");
        command.arg(target);
        command
    };
    command.spawn().with_context(|| format!("Launching '{target}'"))?;
    Ok(())
}

enum MenuAction {
    Run(CommandId),
    JumpToSite,
    JumpToFileSystem,
    ToggleContext,
}

pub struct MenuRenderer {
    ctx: egui::Context,
    inbox: RendererInbox,
    tree: CommandTree,
    disabled: Option<String>,
    open: bool,
    anchor: egui::Pos2,
    context_expanded: bool,
    posted: Vec<PostedTask>,
    opener: ExternalOpener,
    passes: u64,
    last_drawn: Vec<String>,
    hit_boxes: Vec<(String, egui::Rect)>,
    last_shape_count: usize,
}

impl MenuRenderer {
    pub fn new(inbox: RendererInbox) -> Self {
        Self::with_opener(inbox, Rc::new(open_externally))
    }

    pub fn with_opener(inbox: RendererInbox, opener: ExternalOpener) -> Self {
        Self {
            ctx: egui::Context::default(),
            inbox,
            tree: CommandTree::default(),
            disabled: None,
            open: false,
            anchor: egui::pos2(0.0, 0.0),
            context_expanded: true,
            posted: Vec::new(),
            opener,
            passes: 0,
            last_drawn: Vec::new(),
            hit_boxes: Vec::new(),
            last_shape_count: 0,
        }
    }

    pub fn inbox(&self) -> &RendererInbox {
        &self.inbox
    }

    pub fn render(&mut self, tree: CommandTree) {
        debug!(commands = tree.command_count(), context = %tree.context_label, "[renderer] tree replaced");
        self.tree = tree;
        self.disabled = None;
    }

    pub fn render_disabled(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(reason = %reason, "[renderer] menu disabled");
        self.tree = CommandTree::default();
        self.disabled = Some(reason);
    }

    pub fn tree(&self) -> &CommandTree {
        &self.tree
    }

    pub fn disabled_reason(&self) -> Option<&str> {
        self.disabled.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn passes(&self) -> u64 {
        self.passes
    }

    /// Labels drawn by the most recent pass, in draw order.
    pub fn last_drawn(&self) -> &[String] {
        &self.last_drawn
    }

    /// Screen rect of the clickable entry labelled `label` in the most
    /// recent pass.
    pub fn hit_box(&self, label: &str) -> Option<egui::Rect> {
        self.hit_boxes.iter().find(|(drawn, _)| drawn == label).map(|(_, rect)| *rect)
    }

    pub fn is_context_expanded(&self) -> bool {
        self.context_expanded
    }

    pub fn last_shape_count(&self) -> usize {
        self.last_shape_count
    }

    /// Applies a render parked in the inbox, if any.
    pub fn apply_parked(&mut self) {
        match self.inbox.take_render() {
            Some(RenderRequest::Tree(tree)) => self.render(tree),
            Some(RenderRequest::Disabled(reason)) => self.render_disabled(reason),
            None => {}
        }
    }

    fn handle(&mut self, event: MenuEvent) -> Result<(), ToolkitError> {
        match event {
            MenuEvent::Open { at } => {
                self.open = true;
                if let Some([x, y]) = at {
                    self.anchor = egui::pos2(x, y);
                }
                self.pass(Vec::new());
                Ok(())
            }
            MenuEvent::Close => {
                self.open = false;
                self.pass(Vec::new());
                Ok(())
            }
            MenuEvent::Input(input) => {
                if self.open {
                    self.pass(vec![input]);
                }
                Ok(())
            }
            MenuEvent::Activate(id) => self.activate(&id),
        }
    }

    fn activate(&mut self, id: &CommandId) -> Result<(), ToolkitError> {
        let command = self.tree.find(id).ok_or_else(|| ToolkitError::UnknownCommand(id.to_string()))?;
        if !command.is_enabled() {
            return Err(ToolkitError::CommandDisabled(id.to_string()));
        }
        let callback = command.callback.clone();
        let label = id.to_string();
        self.posted.push(PostedTask::new(label.clone(), move || {
            callback().with_context(|| format!("Command '{label}' failed"))
        }));
        self.open = false;
        trace!(command = %id, "[renderer] command posted");
        Ok(())
    }

    fn jump_to_site(&mut self) {
        let Some(url) = self.tree.site_url.clone() else { return };
        let opener = self.opener.clone();
        self.posted.push(PostedTask::new(JUMP_TO_SITE, move || opener(&url)));
    }

    fn jump_to_file_system(&mut self) {
        let paths: Vec<String> =
            self.tree.filesystem_locations.iter().map(|path| path_text(path)).collect();
        let opener = self.opener.clone();
        self.posted.push(PostedTask::new(JUMP_TO_FILE_SYSTEM, move || {
            for path in &paths {
                opener(path)?;
            }
            Ok(())
        }));
    }

    fn pass(&mut self, events: Vec<egui::Event>) {
        let raw_input = egui::RawInput { events, ..Default::default() };
        let mut actions = Vec::new();
        let mut record = PassRecord::default();
        let frame = MenuFrame {
            tree: &self.tree,
            disabled: self.disabled.as_deref(),
            anchor: self.anchor,
            context_expanded: self.context_expanded,
        };
        let open = self.open;
        let full_output = self.ctx.run(raw_input, |ctx| {
            actions.clear();
            record = PassRecord::default();
            if open {
                frame.show(ctx, &mut actions, &mut record);
            }
        });
        self.passes += 1;
        self.last_shape_count = full_output.shapes.len();
        self.last_drawn = record.labels;
        self.hit_boxes = record.boxes;
        for action in actions {
            match action {
                MenuAction::Run(id) => {
                    if let Err(err) = self.activate(&id) {
                        debug!("[renderer] click ignored: {err}");
                    }
                }
                MenuAction::JumpToSite => self.jump_to_site(),
                MenuAction::JumpToFileSystem => self.jump_to_file_system(),
                MenuAction::ToggleContext => self.context_expanded = !self.context_expanded,
            }
        }
    }
}

impl fmt::Debug for MenuRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MenuRenderer")
            .field("open", &self.open)
            .field("disabled", &self.disabled)
            .field("passes", &self.passes)
            .field("posted", &self.posted.len())
            .finish_non_exhaustive()
    }
}

fn path_text(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// What one pass drew: labels in draw order and the screen rect of every
/// clickable entry.
#[derive(Default)]
struct PassRecord {
    labels: Vec<String>,
    boxes: Vec<(String, egui::Rect)>,
}

impl PassRecord {
    fn label(&mut self, label: &str) {
        self.labels.push(label.to_string());
    }

    fn clickable(&mut self, label: &str, response: &egui::Response) {
        self.boxes.push((label.to_string(), response.rect));
    }
}

struct MenuFrame<'a> {
    tree: &'a CommandTree,
    disabled: Option<&'a str>,
    anchor: egui::Pos2,
    context_expanded: bool,
}

impl MenuFrame<'_> {
    fn show(&self, ctx: &egui::Context, actions: &mut Vec<MenuAction>, record: &mut PassRecord) {
        egui::Window::new(WINDOW_TITLE)
            .id(egui::Id::new("pipeline_menu"))
            .title_bar(false)
            .resizable(false)
            .collapsible(false)
            .fixed_pos(self.anchor)
            .show(ctx, |ui| {
                if let Some(reason) = self.disabled {
                    ui.add_enabled(false, egui::Button::new(reason));
                    record.label(reason);
                    return;
                }
                self.context_section(ui, actions, record);
                ui.separator();
                draw_nodes(ui, &self.tree.nodes, actions, record);
            });
    }

    fn context_section(&self, ui: &mut egui::Ui, actions: &mut Vec<MenuAction>, record: &mut PassRecord) {
        let tree = self.tree;
        record.label(&tree.context_label);
        let response = egui::CollapsingHeader::new(tree.context_label.as_str())
            .open(Some(self.context_expanded))
            .show(ui, |ui| {
                record.label(JUMP_TO_SITE);
                let site = ui.add_enabled(tree.site_url.is_some(), egui::Button::new(JUMP_TO_SITE));
                record.clickable(JUMP_TO_SITE, &site);
                if site.clicked() {
                    actions.push(MenuAction::JumpToSite);
                }
                if !tree.filesystem_locations.is_empty() {
                    record.label(JUMP_TO_FILE_SYSTEM);
                    let files = ui.button(JUMP_TO_FILE_SYSTEM);
                    record.clickable(JUMP_TO_FILE_SYSTEM, &files);
                    if files.clicked() {
                        actions.push(MenuAction::JumpToFileSystem);
                    }
                }
                if !tree.context_items.is_empty() {
                    ui.separator();
                    for command in &tree.context_items {
                        draw_command(ui, command, actions, record);
                    }
                }
            });
        record.clickable(&tree.context_label, &response.header_response);
        if response.header_response.clicked() {
            actions.push(MenuAction::ToggleContext);
        }
    }
}

fn draw_nodes(ui: &mut egui::Ui, nodes: &[MenuNode], actions: &mut Vec<MenuAction>, record: &mut PassRecord) {
    for node in nodes {
        match node {
            MenuNode::Command(command) => draw_command(ui, command, actions, record),
            MenuNode::Separator => {
                ui.separator();
            }
            MenuNode::Submenu { label, children } => {
                record.label(&format!("{label} >"));
                egui::CollapsingHeader::new(label.as_str()).default_open(false).show(ui, |ui| {
                    draw_nodes(ui, children, actions, record);
                });
            }
        }
    }
}

fn draw_command(ui: &mut egui::Ui, command: &MenuCommand, actions: &mut Vec<MenuAction>, record: &mut PassRecord) {
    record.label(&command.label);
    let response = if command.is_checkable() {
        let mut checked = command.is_checked();
        ui.add_enabled(command.is_enabled(), egui::Checkbox::new(&mut checked, command.label.as_str()))
    } else {
        ui.add_enabled(command.is_enabled(), egui::Button::new(command.label.as_str()))
    };
    let response = match &command.tooltip {
        Some(tooltip) => response.on_hover_text(tooltip.as_str()),
        None => response,
    };
    record.clickable(&command.label, &response);
    if response.clicked() {
        actions.push(MenuAction::Run(command.id.clone()));
    }
}

impl ForeignToolkit for MenuRenderer {
    fn queued(&self) -> usize {
        self.inbox.len()
    }

    fn dispatch_next(&mut self) -> Option<Result<(), ToolkitError>> {
        self.apply_parked();
        let event = self.inbox.pop()?;
        Some(self.handle(event))
    }

    fn take_posted(&mut self) -> Vec<PostedTask> {
        std::mem::take(&mut self.posted)
    }

    fn discard_pending(&mut self) {
        self.inbox.clear();
        self.posted.clear();
        self.open = false;
    }

    fn wants_shutdown(&self) -> bool {
        self.inbox.shutdown_requested()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{build, BuildOptions, CommandFlags, CommandProvider, CommandSpec, ProviderRegistry};
    use crate::context::Context;
    use std::cell::Cell;

    struct Tools {
        hits: Rc<Cell<u32>>,
    }

    impl CommandProvider for Tools {
        fn name(&self) -> &str {
            "tools"
        }

        fn commands(&self, _context: &Context) -> anyhow::Result<Vec<CommandSpec>> {
            let hits = self.hits.clone();
            Ok(vec![
                CommandSpec::new("tools.reload", "Reload", move || {
                    hits.set(hits.get() + 1);
                    Ok(())
                }),
                CommandSpec::new("tools.locked", "Locked", || Ok(())).flags(CommandFlags::DISABLED),
            ])
        }
    }

    fn renderer_with(context: &Context, hits: Rc<Cell<u32>>) -> MenuRenderer {
        renderer_opening_with(context, hits, Rc::new(|_: &str| -> anyhow::Result<()> { Ok(()) }))
    }

    fn renderer_opening_with(context: &Context, hits: Rc<Cell<u32>>, opener: ExternalOpener) -> MenuRenderer {
        let mut providers = ProviderRegistry::new();
        providers.register(Rc::new(Tools { hits })).expect("register");
        let mut renderer = MenuRenderer::with_opener(RendererInbox::default(), opener);
        renderer.render(build(context, &providers, &BuildOptions::default()));
        renderer
    }

    fn drain(renderer: &mut MenuRenderer) {
        while let Some(outcome) = renderer.dispatch_next() {
            outcome.expect("dispatch");
        }
    }

    /// Opens the menu and lets egui lay the window out before anything is
    /// aimed at it.
    fn open_settled(renderer: &mut MenuRenderer) {
        for _ in 0..3 {
            renderer.inbox().push(MenuEvent::Open { at: Some([40.0, 30.0]) });
        }
        drain(renderer);
    }

    /// Moves the pointer onto `label` and presses and releases the primary
    /// button, one egui pass per event.
    fn click(renderer: &mut MenuRenderer, label: &str) {
        let pos = renderer.hit_box(label).unwrap_or_else(|| panic!("'{label}' was not drawn")).center();
        let inbox = renderer.inbox().clone();
        inbox.push(MenuEvent::Input(egui::Event::PointerMoved(pos)));
        for pressed in [true, false] {
            inbox.push(MenuEvent::Input(egui::Event::PointerButton {
                pos,
                button: egui::PointerButton::Primary,
                pressed,
                modifiers: egui::Modifiers::NONE,
            }));
        }
        drain(renderer);
    }

    fn run_posted(renderer: &mut MenuRenderer) -> usize {
        let tasks = renderer.take_posted();
        let count = tasks.len();
        for task in tasks {
            task.run().expect("posted");
        }
        count
    }

    #[test]
    fn activation_posts_instead_of_running() {
        let hits = Rc::new(Cell::new(0));
        let mut renderer = renderer_with(&Context::new("projectA"), hits.clone());
        renderer.inbox().push(MenuEvent::Open { at: Some([10.0, 20.0]) });
        renderer.inbox().push(MenuEvent::Activate(CommandId::new("tools.reload")));
        assert!(matches!(renderer.dispatch_next(), Some(Ok(()))));
        assert!(renderer.is_open());
        assert!(matches!(renderer.dispatch_next(), Some(Ok(()))));
        assert!(!renderer.is_open());
        assert_eq!(hits.get(), 0);
        for task in renderer.take_posted() {
            task.run().expect("posted");
        }
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn unknown_and_disabled_commands_are_errors() {
        let mut renderer = renderer_with(&Context::default(), Rc::new(Cell::new(0)));
        renderer.inbox().push(MenuEvent::Activate(CommandId::new("missing")));
        renderer.inbox().push(MenuEvent::Activate(CommandId::new("tools.locked")));
        assert_eq!(renderer.dispatch_next(), Some(Err(ToolkitError::UnknownCommand("missing".into()))));
        assert_eq!(renderer.dispatch_next(), Some(Err(ToolkitError::CommandDisabled("tools.locked".into()))));
        assert!(renderer.dispatch_next().is_none());
        assert!(renderer.take_posted().is_empty());
    }

    #[test]
    fn file_system_jump_only_with_locations() {
        let mut renderer = renderer_with(&Context::new("projectA"), Rc::new(Cell::new(0)));
        renderer.inbox().push(MenuEvent::Open { at: None });
        renderer.dispatch_next();
        assert!(renderer.last_drawn().iter().any(|label| label == JUMP_TO_SITE));
        assert!(!renderer.last_drawn().iter().any(|label| label == JUMP_TO_FILE_SYSTEM));

        let context = Context::new("projectA").with_location("/projects/a/shots");
        let mut renderer = renderer_with(&context, Rc::new(Cell::new(0)));
        renderer.inbox().push(MenuEvent::Open { at: None });
        renderer.dispatch_next();
        assert!(renderer.last_drawn().iter().any(|label| label == JUMP_TO_FILE_SYSTEM));
        assert!(renderer.last_drawn().iter().any(|label| label == "Reload"));
    }

    #[test]
    fn clicking_a_command_posts_its_callback() {
        let hits = Rc::new(Cell::new(0));
        let mut renderer = renderer_with(&Context::new("projectA"), hits.clone());
        open_settled(&mut renderer);
        assert!(renderer.is_open());

        click(&mut renderer, "Reload");
        assert_eq!(hits.get(), 0);
        assert!(!renderer.is_open());
        assert_eq!(run_posted(&mut renderer), 1);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn clicking_a_disabled_command_does_nothing() {
        let hits = Rc::new(Cell::new(0));
        let mut renderer = renderer_with(&Context::new("projectA"), hits.clone());
        open_settled(&mut renderer);
        click(&mut renderer, "Locked");
        assert!(renderer.is_open());
        assert_eq!(run_posted(&mut renderer), 0);
    }

    #[test]
    fn jump_to_file_system_opens_every_location() {
        let opened = Rc::new(RefCell::new(Vec::new()));
        let log = opened.clone();
        let opener: ExternalOpener = Rc::new(move |target: &str| -> anyhow::Result<()> {
            log.borrow_mut().push(target.to_string());
            Ok(())
        });
        let context = Context::new("projectA").with_location("/projects/a/shots").with_location("/mnt/cache/a");
        let mut renderer = renderer_opening_with(&context, Rc::new(Cell::new(0)), opener);
        open_settled(&mut renderer);

        click(&mut renderer, JUMP_TO_FILE_SYSTEM);
        assert!(opened.borrow().is_empty());
        assert_eq!(run_posted(&mut renderer), 1);
        assert_eq!(*opened.borrow(), ["/projects/a/shots".to_string(), "/mnt/cache/a".to_string()]);
    }

    #[test]
    fn clicking_the_context_header_collapses_it() {
        let mut renderer = renderer_with(&Context::new("projectA"), Rc::new(Cell::new(0)));
        open_settled(&mut renderer);
        let label = renderer.tree().context_label.clone();
        assert!(renderer.is_context_expanded());
        click(&mut renderer, &label);
        assert!(!renderer.is_context_expanded());
        assert!(renderer.is_open());
        assert_eq!(run_posted(&mut renderer), 0);
    }

    #[test]
    fn parked_render_applies_on_next_dispatch() {
        let mut renderer = renderer_with(&Context::default(), Rc::new(Cell::new(0)));
        renderer.inbox().park_disabled("Pipeline toolkit is disabled.");
        assert!(renderer.disabled_reason().is_none());
        renderer.inbox().push(MenuEvent::Open { at: None });
        renderer.dispatch_next();
        assert_eq!(renderer.disabled_reason(), Some("Pipeline toolkit is disabled."));
        assert_eq!(renderer.last_drawn(), ["Pipeline toolkit is disabled.".to_string()]);
    }
}
