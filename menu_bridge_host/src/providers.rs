//! Stand-ins for the pipeline applications a studio would register.

use anyhow::{bail, Result};
use menu_bridge::commands::{CommandFlags, CommandKind, CommandProvider, CommandSpec};
use menu_bridge::context::Context;
use std::cell::RefCell;
use std::rc::Rc;

/// Shared record of commands the user ran.
pub type ActivityLog = Rc<RefCell<Vec<String>>>;

fn logged(log: &ActivityLog, entry: String) -> impl Fn() -> Result<()> + 'static {
    let log = log.clone();
    move || {
        log.borrow_mut().push(entry.clone());
        Ok(())
    }
}

pub struct Workfiles {
    pub log: ActivityLog,
}

impl CommandProvider for Workfiles {
    fn name(&self) -> &str {
        "workfiles"
    }

    fn menu_group(&self) -> Option<&str> {
        Some("Work Files")
    }

    fn commands(&self, context: &Context) -> Result<Vec<CommandSpec>> {
        let scope = context.label();
        Ok(vec![
            CommandSpec::new("workfiles.open", "File Open...", logged(&self.log, format!("open in {scope}")))
                .tooltip("Open a work file for the current task"),
            CommandSpec::new("workfiles.save", "File Save...", logged(&self.log, format!("save in {scope}"))),
        ])
    }
}

pub struct Loader {
    pub log: ActivityLog,
}

impl CommandProvider for Loader {
    fn name(&self) -> &str {
        "loader"
    }

    fn commands(&self, context: &Context) -> Result<Vec<CommandSpec>> {
        let entity = context.entity_id.clone().unwrap_or_else(|| "project".to_string());
        Ok(vec![CommandSpec::new("loader.load", format!("Load/Into {entity}..."), logged(&self.log, format!("load {entity}")))])
    }
}

pub struct Publisher {
    pub log: ActivityLog,
}

impl CommandProvider for Publisher {
    fn name(&self) -> &str {
        "publisher"
    }

    fn commands(&self, context: &Context) -> Result<Vec<CommandSpec>> {
        let Some(task) = &context.task else {
            bail!("publishing needs a task context");
        };
        let flags = if context.entity_id.is_some() { CommandFlags::empty() } else { CommandFlags::DISABLED };
        Ok(vec![
            CommandSpec::new("publisher.publish", "Publish...", logged(&self.log, format!("publish {task}"))).flags(flags),
        ])
    }
}

pub struct About;

impl CommandProvider for About {
    fn name(&self) -> &str {
        "about"
    }

    fn commands(&self, _context: &Context) -> Result<Vec<CommandSpec>> {
        Ok(vec![CommandSpec::new("about.work_area", "Work Area Info...", || Ok(())).kind(CommandKind::ContextMenu)])
    }
}

pub fn demo_providers(log: &ActivityLog) -> Vec<Rc<dyn CommandProvider>> {
    vec![
        Rc::new(Workfiles { log: log.clone() }),
        Rc::new(Loader { log: log.clone() }),
        Rc::new(Publisher { log: log.clone() }),
        Rc::new(About),
    ]
}
