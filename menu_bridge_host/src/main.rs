use anyhow::Result;
use menu_bridge::cli::CliOverrides;
use menu_bridge::config::{BridgeConfig, EnvOverrides};
use menu_bridge::context::Context;
use menu_bridge::logging::init_logging;
use menu_bridge_host::session::{default_context, run_session, DEFAULT_FRAMES};
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "config/menu_bridge.json";

fn main() {
    let cli = match CliOverrides::parse_from_env() {
        Ok(cli) => cli,
        Err(err) => {
            eprintln!("[cli] {err}");
            std::process::exit(2);
        }
    };
    if let Err(err) = run(cli) {
        eprintln!("Host session error: {err:?}");
        std::process::exit(1);
    }
}

fn run(cli: CliOverrides) -> Result<()> {
    let env = EnvOverrides::from_env()?;
    let mut config = match cli.config_path().cloned().or_else(|| env.config_path.clone()) {
        Some(path) => BridgeConfig::load(&path)?,
        None => BridgeConfig::load_or_default(PathBuf::from(DEFAULT_CONFIG)),
    };
    let overrides = env.config_overrides().merged_with(cli.config_overrides());
    config.apply_overrides(&overrides);
    init_logging(&config.logging)?;
    if !overrides.is_empty() {
        tracing::info!(fields = ?overrides.applied_fields(), "[config] overrides applied");
    }

    let context = match &env.context_json {
        Some(json) => Context::from_json(json)?,
        None => default_context(),
    };
    let summary = run_session(config, context, cli.frames().unwrap_or(DEFAULT_FRAMES))?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
