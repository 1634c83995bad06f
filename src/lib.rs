pub mod bridge;
pub mod cli;
pub mod commands;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod host;
pub mod logging;
pub mod patch;
pub mod renderer;

pub use bridge::{BridgeState, BridgeStats, EventLoopBridge, ForeignToolkit, PostedTask, TickReport};
pub use commands::{
    build, BuildOptions, CommandFlags, CommandId, CommandKind, CommandProvider, CommandSpec, CommandTree, MenuNode,
    ProviderRegistry,
};
pub use config::BridgeConfig;
pub use context::{Context, ContextTracker};
pub use engine::{MenuAvailability, PipelineEngine, StartupReport};
pub use patch::{AnchorPattern, PatchEngine, PatchResult};
pub use renderer::{MenuEvent, MenuRenderer};
