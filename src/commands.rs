//! Command tree builder: asks every registered provider for its commands in
//! the current context and arranges them into the menu hierarchy.

use std::fmt;
use std::path::PathBuf;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;

use anyhow::{bail, Result};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::context::Context;
use crate::error::{panic_message, IntegrationFailure};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(String);

impl CommandId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommandId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CommandFlags: u8 {
        const DISABLED = 1 << 0;
        const CHECKABLE = 1 << 1;
        const CHECKED = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKind {
    #[default]
    Default,
    /// Listed under the context section instead of the main menu.
    ContextMenu,
}

pub type CommandCallback = Rc<dyn Fn() -> Result<()>>;

#[derive(Clone)]
pub struct CommandSpec {
    pub id: CommandId,
    pub label: String,
    pub icon: Option<String>,
    pub favorite: bool,
    pub kind: CommandKind,
    pub tooltip: Option<String>,
    pub flags: CommandFlags,
    pub callback: CommandCallback,
}

impl CommandSpec {
    pub fn new(id: impl Into<String>, label: impl Into<String>, callback: impl Fn() -> Result<()> + 'static) -> Self {
        Self {
            id: CommandId::new(id),
            label: label.into(),
            icon: None,
            favorite: false,
            kind: CommandKind::Default,
            tooltip: None,
            flags: CommandFlags::empty(),
            callback: Rc::new(callback),
        }
    }

    pub fn favorite(mut self) -> Self {
        self.favorite = true;
        self
    }

    pub fn icon(mut self, icon: &str) -> Self {
        self.icon = Some(icon.to_string());
        self
    }

    pub fn tooltip(mut self, tooltip: &str) -> Self {
        self.tooltip = Some(tooltip.to_string());
        self
    }

    pub fn kind(mut self, kind: CommandKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn flags(mut self, flags: CommandFlags) -> Self {
        self.flags = flags;
        self
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("favorite", &self.favorite)
            .field("kind", &self.kind)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

/// A registered pipeline application.
pub trait CommandProvider {
    fn name(&self) -> &str;

    fn commands(&self, context: &Context) -> Result<Vec<CommandSpec>>;

    /// Sub-menu label for this provider's entries when it has more than one.
    fn menu_group(&self) -> Option<&str> {
        None
    }
}

/// Providers in declaration order.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Rc<dyn CommandProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Rc<dyn CommandProvider>) -> Result<()> {
        if self.providers.iter().any(|existing| existing.name() == provider.name()) {
            bail!("Command provider '{}' is already registered", provider.name());
        }
        debug!(provider = provider.name(), "[commands] provider registered");
        self.providers.push(provider);
        Ok(())
    }

    pub fn deregister(&mut self, name: &str) -> bool {
        let before = self.providers.len();
        self.providers.retain(|provider| provider.name() != name);
        before != self.providers.len()
    }

    pub fn clear(&mut self) {
        self.providers.clear();
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|provider| provider.name().to_string()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rc<dyn CommandProvider>> {
        self.providers.iter()
    }
}

/// A favorite picked out by configuration rather than by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoriteRef {
    pub provider: String,
    pub label: String,
}

/// A command to run once the first menu exists. An empty `label` runs every
/// command the provider offers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupCommand {
    pub provider: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    pub favorites: Vec<FavoriteRef>,
}

impl BuildOptions {
    fn is_favorite(&self, provider: &str, spec: &CommandSpec) -> bool {
        spec.favorite || self.favorites.iter().any(|fav| fav.provider == provider && fav.label == spec.label)
    }
}

/// A command as placed in the tree. `label` is the last path segment.
#[derive(Clone)]
pub struct MenuCommand {
    pub id: CommandId,
    pub label: String,
    /// Label as the provider declared it, sub-menu path included.
    pub full_label: String,
    pub provider: String,
    pub icon: Option<String>,
    pub tooltip: Option<String>,
    pub flags: CommandFlags,
    pub favorite: bool,
    pub callback: CommandCallback,
}

impl MenuCommand {
    fn from_spec(provider: &str, label: String, spec: CommandSpec, favorite: bool) -> Self {
        Self {
            id: spec.id,
            label,
            full_label: spec.label,
            provider: provider.to_string(),
            icon: spec.icon,
            tooltip: spec.tooltip,
            flags: spec.flags,
            favorite,
            callback: spec.callback,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.flags.contains(CommandFlags::DISABLED)
    }

    pub fn is_checkable(&self) -> bool {
        self.flags.contains(CommandFlags::CHECKABLE)
    }

    pub fn is_checked(&self) -> bool {
        self.flags.contains(CommandFlags::CHECKED)
    }
}

impl fmt::Debug for MenuCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MenuCommand")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("provider", &self.provider)
            .field("flags", &self.flags)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum MenuNode {
    Command(MenuCommand),
    Submenu { label: String, children: Vec<MenuNode> },
    Separator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub provider: String,
    pub message: String,
    pub panicked: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CommandTree {
    pub nodes: Vec<MenuNode>,
    pub context_items: Vec<MenuCommand>,
    pub context_label: String,
    pub site_url: Option<String>,
    pub filesystem_locations: Vec<PathBuf>,
    pub failures: Vec<ProviderFailure>,
}

impl CommandTree {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.context_items.is_empty()
    }

    pub fn find(&self, id: &CommandId) -> Option<&MenuCommand> {
        self.context_items.iter().find(|command| &command.id == id).or_else(|| find_in(&self.nodes, id))
    }

    /// Flat, indented rendering of the main list: `label`, `---` for
    /// separators and `name >` for sub-menus.
    pub fn outline(&self) -> Vec<String> {
        let mut out = Vec::new();
        outline_into(&self.nodes, 0, &mut out);
        out
    }

    pub fn command_count(&self) -> usize {
        count_commands(&self.nodes) + self.context_items.len()
    }

    /// Every command in draw order, context items last.
    pub fn commands(&self) -> Vec<&MenuCommand> {
        let mut out = Vec::new();
        collect_commands(&self.nodes, &mut out);
        out.extend(self.context_items.iter());
        out
    }
}

fn collect_commands<'a>(nodes: &'a [MenuNode], out: &mut Vec<&'a MenuCommand>) {
    for node in nodes {
        match node {
            MenuNode::Command(command) => out.push(command),
            MenuNode::Submenu { children, .. } => collect_commands(children, out),
            MenuNode::Separator => {}
        }
    }
}

/// Resolves `requests` against `tree`, in request order. Unknown providers
/// and labels are logged and skipped.
pub fn resolve_startup(tree: &CommandTree, requests: &[StartupCommand]) -> Vec<CommandId> {
    let commands = tree.commands();
    let mut resolved = Vec::new();
    for request in requests {
        let offered: Vec<&MenuCommand> =
            commands.iter().copied().filter(|command| command.provider == request.provider).collect();
        if offered.is_empty() {
            warn!(
                provider = %request.provider,
                "[commands] 'run_at_startup' requests provider '{}' that offers no commands",
                request.provider
            );
            continue;
        }
        if request.label.is_empty() {
            resolved.extend(offered.iter().map(|command| command.id.clone()));
            continue;
        }
        match offered.iter().find(|command| command.full_label == request.label) {
            Some(command) => resolved.push(command.id.clone()),
            None => {
                let known =
                    offered.iter().map(|command| format!("'{}'", command.full_label)).collect::<Vec<_>>().join(", ");
                warn!(
                    provider = %request.provider,
                    "[commands] 'run_at_startup' requests unknown command '{}'. Known commands: {known}",
                    request.label
                );
            }
        }
    }
    resolved
}

fn find_in<'a>(nodes: &'a [MenuNode], id: &CommandId) -> Option<&'a MenuCommand> {
    nodes.iter().find_map(|node| match node {
        MenuNode::Command(command) if &command.id == id => Some(command),
        MenuNode::Submenu { children, .. } => find_in(children, id),
        _ => None,
    })
}

fn outline_into(nodes: &[MenuNode], depth: usize, out: &mut Vec<String>) {
    let indent = "  ".repeat(depth);
    for node in nodes {
        match node {
            MenuNode::Command(command) => out.push(format!("{indent}{}", command.label)),
            MenuNode::Separator => out.push(format!("{indent}---")),
            MenuNode::Submenu { label, children } => {
                out.push(format!("{indent}{label} >"));
                outline_into(children, depth + 1, out);
            }
        }
    }
}

fn count_commands(nodes: &[MenuNode]) -> usize {
    nodes
        .iter()
        .map(|node| match node {
            MenuNode::Command(_) => 1,
            MenuNode::Submenu { children, .. } => count_commands(children),
            MenuNode::Separator => 0,
        })
        .sum()
}

/// Places `command` under the sub-menus named by the leading segments of
/// `path`, reusing sub-menus that already exist at each level.
fn insert_at_path(nodes: &mut Vec<MenuNode>, path: &[&str], command: MenuCommand) {
    let Some((head, rest)) = path.split_first() else {
        nodes.push(MenuNode::Command(command));
        return;
    };
    let existing = nodes.iter().position(|node| matches!(node, MenuNode::Submenu { label, .. } if label == head));
    let idx = match existing {
        Some(idx) => idx,
        None => {
            nodes.push(MenuNode::Submenu { label: head.to_string(), children: Vec::new() });
            nodes.len() - 1
        }
    };
    if let Some(MenuNode::Submenu { children, .. }) = nodes.get_mut(idx) {
        insert_at_path(children, rest, command);
    }
}

fn place(nodes: &mut Vec<MenuNode>, provider: &str, spec: CommandSpec, favorite: bool) {
    let segments: Vec<&str> = spec.label.split('/').map(str::trim).filter(|part| !part.is_empty()).collect();
    let (leaf, dirs) = match segments.split_last() {
        Some((leaf, dirs)) => (leaf.to_string(), dirs.iter().map(|dir| dir.to_string()).collect::<Vec<_>>()),
        None => (spec.label.clone(), Vec::new()),
    };
    let dirs: Vec<&str> = dirs.iter().map(String::as_str).collect();
    insert_at_path(nodes, &dirs, MenuCommand::from_spec(provider, leaf, spec, favorite));
}

fn collect(provider: &dyn CommandProvider, context: &Context) -> Result<Vec<CommandSpec>, ProviderFailure> {
    match catch_unwind(AssertUnwindSafe(|| provider.commands(context))) {
        Ok(Ok(specs)) => Ok(specs),
        Ok(Err(err)) => {
            Err(ProviderFailure { provider: provider.name().to_string(), message: format!("{err:#}"), panicked: false })
        }
        Err(payload) => Err(ProviderFailure {
            provider: provider.name().to_string(),
            message: panic_message(&*payload),
            panicked: true,
        }),
    }
}

/// Builds the menu for `context`. Favorites come first in provider order,
/// then a separator, then every other entry in provider order. A provider
/// that fails or panics contributes nothing.
pub fn build(context: &Context, providers: &ProviderRegistry, options: &BuildOptions) -> CommandTree {
    let mut favorites = Vec::new();
    let mut rest = Vec::new();
    let mut tree = CommandTree {
        context_label: context.label(),
        site_url: context.site_url.clone(),
        filesystem_locations: context.filesystem_locations.clone(),
        ..CommandTree::default()
    };

    for provider in providers.iter() {
        let name = provider.name();
        let specs = match collect(provider.as_ref(), context) {
            Ok(specs) => specs,
            Err(failure) => {
                error!(
                    failure = %IntegrationFailure::ProviderFailed,
                    provider = name,
                    panicked = failure.panicked,
                    context = ?context,
                    "[commands] provider failed: {}",
                    failure.message
                );
                tree.failures.push(failure);
                continue;
            }
        };

        let mut own = Vec::new();
        for spec in specs {
            if spec.kind == CommandKind::ContextMenu {
                let label = spec.label.clone();
                tree.context_items.push(MenuCommand::from_spec(name, label, spec, false));
            } else if options.is_favorite(name, &spec) {
                place(&mut favorites, name, spec, true);
            } else {
                own.push(spec);
            }
        }
        match provider.menu_group() {
            Some(group) if own.len() > 1 => {
                let mut children = Vec::new();
                for spec in own {
                    place(&mut children, name, spec, false);
                }
                rest.push(MenuNode::Submenu { label: group.to_string(), children });
            }
            _ => {
                for spec in own {
                    place(&mut rest, name, spec, false);
                }
            }
        }
    }

    let has_both = !favorites.is_empty() && !rest.is_empty();
    tree.nodes = favorites;
    if has_both {
        tree.nodes.push(MenuNode::Separator);
    }
    tree.nodes.append(&mut rest);
    debug!(
        commands = tree.command_count(),
        failures = tree.failures.len(),
        context = %tree.context_label,
        "[commands] tree built"
    );
    tree
}
