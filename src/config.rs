// src/config.rs
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const ENV_PATH: &str = "AI_MONITOR_CONFIG_PATH";
const DEFAULT_PATH: &str = "config/monitor.toml";

pub const DEFAULT_SERVER_PORT: u16 = 7890;
pub const DEFAULT_AUTO_REFRESH_MINUTES: u64 = 30;

/// Per-source settings. Pull sources read their credentials from here;
/// push-fed browser sources only care about `enabled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub enabled: bool,
    pub api_key: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Port the local ingestion server listens on (the userscript default).
    pub server_port: u16,
    pub auto_refresh_minutes: u64,
    pub sources: BTreeMap<String, SourceConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_port: DEFAULT_SERVER_PORT,
            auto_refresh_minutes: DEFAULT_AUTO_REFRESH_MINUTES,
            sources: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Settings for one source, falling back to defaults when the config
    /// file has no section for it (new sources stay enabled).
    pub fn source(&self, key: &str) -> SourceConfig {
        self.sources.get(key).cloned().unwrap_or_default()
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        self.source(key).enabled
    }

    /// Auto-refresh interval, clamped to a minimum of 1 minute to avoid a
    /// tight refresh loop.
    pub fn auto_refresh_minutes_clamped(&self) -> u64 {
        self.auto_refresh_minutes.max(1)
    }
}

/// Load config from an explicit TOML path.
pub fn load_from(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
}

/// Load config using env var + fallbacks:
/// 1) $AI_MONITOR_CONFIG_PATH
/// 2) config/monitor.toml
/// 3) built-in defaults
pub fn load_default() -> Result<AppConfig> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        return load_from(&pb)
            .with_context(|| format!("{ENV_PATH} points to an unusable config"));
    }
    let fallback = PathBuf::from(DEFAULT_PATH);
    if fallback.exists() {
        return load_from(&fallback);
    }
    Ok(AppConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn defaults_match_the_userscript_contract() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server_port, 7890);
        assert_eq!(cfg.auto_refresh_minutes, 30);
        assert!(cfg.is_enabled("browser_openai"), "unknown sources default to enabled");
    }

    #[test]
    fn refresh_interval_is_clamped() {
        let cfg = AppConfig {
            auto_refresh_minutes: 0,
            ..Default::default()
        };
        assert_eq!(cfg.auto_refresh_minutes_clamped(), 1);
    }

    #[serial_test::serial]
    #[test]
    fn env_path_wins_over_fallbacks() {
        let tmp = tempfile::tempdir().unwrap();
        let p = tmp.path().join("monitor.toml");
        fs::write(
            &p,
            r#"
server_port = 9999
auto_refresh_minutes = 5

[sources.openai_api]
enabled = false
api_key = "sk-test"
"#,
        )
        .unwrap();

        env::set_var(ENV_PATH, p.display().to_string());
        let cfg = load_default().unwrap();
        env::remove_var(ENV_PATH);

        assert_eq!(cfg.server_port, 9999);
        assert!(!cfg.is_enabled("openai_api"));
        assert_eq!(cfg.source("openai_api").api_key, "sk-test");
    }

    #[serial_test::serial]
    #[test]
    fn missing_files_fall_back_to_defaults() {
        env::remove_var(ENV_PATH);
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();

        let cfg = load_default().unwrap();
        assert_eq!(cfg.server_port, DEFAULT_SERVER_PORT);

        env::set_current_dir(&old).unwrap();
    }
}
