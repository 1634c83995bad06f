use std::any::Any;
use std::fmt;

use thiserror::Error;

/// Failure classes surfaced by the integration. Used as the `failure` field on
/// log events so offline diagnosis can group them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationFailure {
    AnchorNotFound,
    RecompilationFailed,
    ProviderFailed,
    BridgeTickFailure,
}

impl IntegrationFailure {
    pub fn label(self) -> &'static str {
        match self {
            IntegrationFailure::AnchorNotFound => "anchor_not_found",
            IntegrationFailure::RecompilationFailed => "recompilation_failed",
            IntegrationFailure::ProviderFailed => "provider_failed",
            IntegrationFailure::BridgeTickFailure => "bridge_tick_failure",
        }
    }
}

impl fmt::Display for IntegrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error("unterminated string literal starting at byte {offset}")]
    UnterminatedString { offset: usize },
    #[error("unterminated block comment starting at byte {offset}")]
    UnterminatedComment { offset: usize },
    #[error("unexpected end of source while parsing {context}")]
    UnexpectedEof { context: &'static str },
    #[error("expected {expected} at byte {offset}")]
    Expected { expected: &'static str, offset: usize },
    #[error("unbalanced '{delimiter}' at byte {offset}")]
    Unbalanced { delimiter: char, offset: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("module '{module}' failed to compile: {message}")]
    Compile { module: String, message: String },
    #[error("no routine named '{0}'")]
    RoutineNotFound(String),
    #[error("no menu class registered as '{0}'")]
    ClassNotFound(String),
    #[error("menu class '{0}' is already registered")]
    ClassExists(String),
    #[error("routine '{routine}' failed: {message}")]
    Script { routine: String, message: String },
    #[error("native menu '{class}' failed: {message}")]
    Native { class: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolkitError {
    #[error("no command '{0}' in the current menu")]
    UnknownCommand(String),
    #[error("command '{0}' is disabled")]
    CommandDisabled(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("event-loop bridge is already running")]
    AlreadyRunning,
}

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
