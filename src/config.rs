use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::commands::{FavoriteRef, StartupCommand};
use crate::patch::{AnchorPattern, DEFAULT_HOOK_NAME};

pub const CONFIG_ENV: &str = "MENU_BRIDGE_CONFIG";
pub const LOG_ENV: &str = "MENU_BRIDGE_LOG";
pub const TICK_ENV: &str = "MENU_BRIDGE_TICK_MS";
pub const CONTEXT_ENV: &str = "MENU_BRIDGE_CONTEXT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuConfig {
    #[serde(default = "MenuConfig::default_class_id")]
    pub class_id: String,
    #[serde(default = "MenuConfig::default_label")]
    pub label: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default = "MenuConfig::default_hook_name")]
    pub hook_name: String,
    #[serde(default)]
    pub anchor: AnchorPattern,
    #[serde(default = "MenuConfig::default_allow_extension_fallback")]
    pub allow_extension_fallback: bool,
    /// Host menu class extended when the menu-bar routine cannot be patched.
    #[serde(default = "MenuConfig::default_fallback_class")]
    pub fallback_class: String,
    #[serde(default)]
    pub favorites: Vec<FavoriteRef>,
    /// Commands run once, right after the first menu is built.
    #[serde(default)]
    pub run_at_startup: Vec<StartupCommand>,
}

impl MenuConfig {
    fn default_class_id() -> String {
        "TOPBAR_MT_pipeline".to_string()
    }

    fn default_label() -> String {
        "Pipeline".to_string()
    }

    fn default_hook_name() -> String {
        DEFAULT_HOOK_NAME.to_string()
    }

    const fn default_allow_extension_fallback() -> bool {
        true
    }

    fn default_fallback_class() -> String {
        "TOPBAR_MT_editor_menus".to_string()
    }
}

impl Default for MenuConfig {
    fn default() -> Self {
        Self {
            class_id: Self::default_class_id(),
            label: Self::default_label(),
            icon: None,
            hook_name: Self::default_hook_name(),
            anchor: AnchorPattern::default(),
            allow_extension_fallback: Self::default_allow_extension_fallback(),
            fallback_class: Self::default_fallback_class(),
            favorites: Vec::new(),
            run_at_startup: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeTimingConfig {
    /// Hint passed to the host timer; the host may call more often.
    #[serde(default = "BridgeTimingConfig::default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl BridgeTimingConfig {
    const fn default_tick_interval_ms() -> u64 {
        10
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

impl Default for BridgeTimingConfig {
    fn default() -> Self {
        Self { tick_interval_ms: Self::default_tick_interval_ms() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `menu_bridge=debug`.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: Self::default_level(), format: LogFormat::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BridgeConfig {
    #[serde(default)]
    pub menu: MenuConfig,
    #[serde(default)]
    pub bridge: BridgeTimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BridgeConfigOverrides {
    pub tick_interval_ms: Option<u64>,
    pub log_level: Option<String>,
}

impl BridgeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let cfg = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                warn!("Config load error: {err:?}. Falling back to defaults.");
                Self::default()
            }
        }
    }

    pub fn apply_overrides(&mut self, overrides: &BridgeConfigOverrides) {
        if let Some(tick) = overrides.tick_interval_ms {
            self.bridge.tick_interval_ms = tick;
        }
        if let Some(level) = &overrides.log_level {
            self.logging.level = level.clone();
        }
    }
}

impl BridgeConfigOverrides {
    pub fn is_empty(&self) -> bool {
        self.tick_interval_ms.is_none() && self.log_level.is_none()
    }

    pub fn applied_fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.tick_interval_ms.is_some() {
            fields.push("tick_interval_ms");
        }
        if self.log_level.is_some() {
            fields.push("log_level");
        }
        fields
    }

    /// Fields set in `other` win.
    pub fn merged_with(mut self, other: BridgeConfigOverrides) -> Self {
        if other.tick_interval_ms.is_some() {
            self.tick_interval_ms = other.tick_interval_ms;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
        self
    }
}

/// Process-level settings read once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub config_path: Option<PathBuf>,
    pub log_filter: Option<String>,
    pub tick_interval_ms: Option<u64>,
    pub context_json: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let tick_interval_ms = match non_empty(TICK_ENV) {
            Some(raw) => Some(
                raw.trim().parse::<u64>().with_context(|| format!("Invalid {TICK_ENV} value '{raw}'"))?,
            ),
            None => None,
        };
        Ok(Self {
            config_path: non_empty(CONFIG_ENV).map(PathBuf::from),
            log_filter: non_empty(LOG_ENV),
            tick_interval_ms,
            context_json: non_empty(CONTEXT_ENV),
        })
    }

    pub fn config_overrides(&self) -> BridgeConfigOverrides {
        BridgeConfigOverrides { tick_interval_ms: self.tick_interval_ms, log_level: self.log_filter.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_fill_defaults() {
        let cfg: BridgeConfig =
            serde_json::from_str(r#"{"menu": {"label": "Studio"}, "bridge": {}}"#).expect("parse config");
        assert_eq!(cfg.menu.label, "Studio");
        assert_eq!(cfg.menu.class_id, "TOPBAR_MT_pipeline");
        assert_eq!(cfg.menu.anchor, AnchorPattern::default());
        assert_eq!(cfg.bridge.tick_interval(), Duration::from_millis(10));
        assert_eq!(cfg.logging.format, LogFormat::Text);
    }

    #[test]
    fn env_lookup_parses_tick_and_ignores_blank_values() {
        let env = EnvOverrides::from_lookup(|key| match key {
            TICK_ENV => Some("25".to_string()),
            LOG_ENV => Some("  ".to_string()),
            _ => None,
        })
        .expect("env");
        assert_eq!(env.tick_interval_ms, Some(25));
        assert_eq!(env.log_filter, None);

        let err = EnvOverrides::from_lookup(|key| (key == TICK_ENV).then(|| "soon".to_string())).unwrap_err();
        assert!(err.to_string().contains(TICK_ENV));
    }

    #[test]
    fn later_overrides_win() {
        let env = BridgeConfigOverrides { tick_interval_ms: Some(5), log_level: Some("debug".into()) };
        let cli = BridgeConfigOverrides { tick_interval_ms: Some(40), log_level: None };
        let merged = env.merged_with(cli);
        assert_eq!(merged.applied_fields(), vec!["tick_interval_ms", "log_level"]);
        let mut cfg = BridgeConfig::default();
        cfg.apply_overrides(&merged);
        assert_eq!(cfg.bridge.tick_interval_ms, 40);
        assert_eq!(cfg.logging.level, "debug");
    }
}
