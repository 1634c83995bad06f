use menu_bridge::config::{BridgeConfig, BridgeConfigOverrides, EnvOverrides, LogFormat, CONTEXT_ENV, TICK_ENV};
use menu_bridge::context::Context;
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn loads_the_shipped_config() {
    let cfg = BridgeConfig::load(concat!(env!("CARGO_MANIFEST_DIR"), "/config/menu_bridge.json")).expect("config");
    assert_eq!(cfg.menu.class_id, "TOPBAR_MT_pipeline");
    assert_eq!(cfg.menu.anchor.insert_before.as_deref(), Some("TOPBAR_MT_help"));
    assert_eq!(cfg.menu.favorites.len(), 1);
    assert!(cfg.menu.run_at_startup.is_empty());
    assert_eq!(cfg.bridge.tick_interval(), Duration::from_millis(10));
}

#[test]
fn partial_file_on_disk() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("bridge.json");
    fs::write(&path, r#"{ "logging": { "format": "json" }, "menu": { "anchor": { "min_sibling_calls": 2 } } }"#)
        .expect("write config");
    let cfg = BridgeConfig::load(&path).expect("load config");
    assert_eq!(cfg.logging.format, LogFormat::Json);
    assert_eq!(cfg.logging.level, "info");
    assert_eq!(cfg.menu.anchor.min_sibling_calls, 2);
    assert_eq!(cfg.menu.anchor.primitive, "menu");
    assert!(cfg.menu.allow_extension_fallback);
}

#[test]
fn startup_commands_default_to_the_whole_provider() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("bridge.json");
    fs::write(
        &path,
        r#"{ "menu": { "run_at_startup": [ { "provider": "workfiles", "label": "File Open..." }, { "provider": "loader" } ] } }"#,
    )
    .expect("write config");
    let cfg = BridgeConfig::load(&path).expect("load config");
    let requests = &cfg.menu.run_at_startup;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].label, "File Open...");
    assert_eq!(requests[1].provider, "loader");
    assert!(requests[1].label.is_empty());
}

#[test]
fn load_errors_name_the_file() {
    let dir = tempdir().expect("temp dir");
    let path = dir.path().join("broken.json");
    fs::write(&path, "{ menu: ").expect("write config");
    let err = BridgeConfig::load(&path).unwrap_err();
    assert!(format!("{err:#}").contains("broken.json"));
    assert_eq!(BridgeConfig::load_or_default(&path), BridgeConfig::default());
    assert_eq!(BridgeConfig::load_or_default(dir.path().join("missing.json")), BridgeConfig::default());
}

#[test]
fn env_overrides_feed_config_and_context() {
    let env = EnvOverrides::from_lookup(|key| match key {
        TICK_ENV => Some("33".to_string()),
        CONTEXT_ENV => Some(r#"{"project": "projectA", "task": "taskX"}"#.to_string()),
        _ => None,
    })
    .expect("env overrides");
    let mut cfg = BridgeConfig::default();
    cfg.apply_overrides(&env.config_overrides());
    assert_eq!(cfg.bridge.tick_interval_ms, 33);

    let context = Context::from_json(env.context_json.as_deref().expect("context json")).expect("context");
    assert_eq!(context.task.as_deref(), Some("taskX"));
    assert!(BridgeConfigOverrides::default().is_empty());
}
