use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::error::{panic_message, IntegrationFailure};

/// The pipeline's view of what the user is working on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Context {
    pub project: Option<String>,
    pub entity_type: Option<String>,
    pub entity_id: Option<String>,
    pub task: Option<String>,
    pub site_url: Option<String>,
    pub filesystem_locations: Vec<PathBuf>,
}

impl Context {
    pub fn new(project: &str) -> Self {
        Self { project: Some(project.to_string()), ..Self::default() }
    }

    pub fn with_entity(mut self, entity_type: &str, entity_id: &str) -> Self {
        self.entity_type = Some(entity_type.to_string());
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn with_task(mut self, task: &str) -> Self {
        self.task = Some(task.to_string());
        self
    }

    pub fn with_site_url(mut self, url: &str) -> Self {
        self.site_url = Some(url.to_string());
        self
    }

    pub fn with_location(mut self, path: impl Into<PathBuf>) -> Self {
        self.filesystem_locations.push(path.into());
        self
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Parsing pipeline context JSON")
    }

    pub fn is_empty(&self) -> bool {
        self.project.is_none() && self.entity_type.is_none() && self.task.is_none()
    }

    /// Header text for the context section of the menu.
    pub fn label(&self) -> String {
        if self.is_empty() {
            return "No pipeline context".to_string();
        }
        let mut parts = Vec::new();
        if let Some(project) = &self.project {
            parts.push(project.clone());
        }
        match (&self.entity_type, &self.entity_id) {
            (Some(kind), Some(id)) => parts.push(format!("{kind} {id}")),
            (Some(kind), None) => parts.push(kind.clone()),
            (None, Some(id)) => parts.push(id.clone()),
            (None, None) => {}
        }
        if let Some(task) = &self.task {
            parts.push(task.clone());
        }
        parts.join(" / ")
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSnapshot {
    pub version: u64,
    pub context: Context,
}

/// Versioned holder of the current context. Values are only ever replaced.
#[derive(Debug)]
pub struct ContextCell {
    current: RwLock<Arc<ContextSnapshot>>,
}

impl ContextCell {
    pub fn new(context: Context) -> Self {
        Self { current: RwLock::new(Arc::new(ContextSnapshot { version: 0, context })) }
    }

    pub fn load(&self) -> Arc<ContextSnapshot> {
        self.current.read().clone()
    }

    pub fn replace(&self, context: Context) -> Arc<ContextSnapshot> {
        let mut guard = self.current.write();
        let next = Arc::new(ContextSnapshot { version: guard.version + 1, context });
        *guard = next.clone();
        next
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }
}

pub type ContextListener = Rc<dyn Fn(&Arc<ContextSnapshot>)>;

/// Holds the current context and tells listeners, in registration order,
/// whenever it is replaced.
pub struct ContextTracker {
    cell: Arc<ContextCell>,
    listeners: RefCell<Vec<ContextListener>>,
    notifying: Cell<bool>,
    pending: RefCell<VecDeque<Context>>,
}

impl ContextTracker {
    pub fn new(context: Context) -> Self {
        Self {
            cell: Arc::new(ContextCell::new(context)),
            listeners: RefCell::new(Vec::new()),
            notifying: Cell::new(false),
            pending: RefCell::new(VecDeque::new()),
        }
    }

    pub fn cell(&self) -> Arc<ContextCell> {
        self.cell.clone()
    }

    pub fn current(&self) -> Arc<ContextSnapshot> {
        self.cell.load()
    }

    pub fn subscribe(&self, listener: ContextListener) {
        self.listeners.borrow_mut().push(listener);
    }

    pub fn clear_listeners(&self) {
        self.listeners.borrow_mut().clear();
    }

    /// Replaces the context and notifies every listener. A change reported
    /// from inside a listener is queued and delivered after the current
    /// round completes.
    pub fn on_context_changed(&self, context: Context) {
        self.pending.borrow_mut().push_back(context);
        if self.notifying.replace(true) {
            return;
        }
        loop {
            let next = self.pending.borrow_mut().pop_front();
            let Some(context) = next else { break };
            let snapshot = self.cell.replace(context);
            debug!(version = snapshot.version, context = %snapshot.context, "[context] changed");
            let listeners: Vec<ContextListener> = self.listeners.borrow().clone();
            for listener in listeners {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(&snapshot))) {
                    error!(
                        failure = %IntegrationFailure::ProviderFailed,
                        version = snapshot.version,
                        "[context] listener panicked: {}",
                        panic_message(&*payload)
                    );
                }
            }
        }
        self.notifying.set(false);
    }
}
