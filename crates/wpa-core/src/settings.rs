use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use wpa_schema::ConfigError;

/// Environment variable overriding the settings file location.
pub const SETTINGS_ENV: &str = "WPA_SETTINGS";

/// Per-user orchestrator settings, independent of any one test suite.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct OrchestratorSettings {
    /// `docker`, `podman` or `mock`.
    pub engine: String,
    /// Delay between database readiness checks.
    pub poll_interval_ms: u64,
    /// Readiness wait used when neither the caller nor the suite sets one.
    pub default_db_wait_seconds: u64,
    pub install_signal_handler: bool,
    /// Keep cache-eligible environments alive when the orchestrator shuts down.
    pub preserve_cached_on_shutdown: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            engine: "docker".to_owned(),
            poll_interval_ms: 1000,
            default_db_wait_seconds: 30,
            install_signal_handler: true,
            preserve_cached_on_shutdown: false,
        }
    }
}

impl OrchestratorSettings {
    pub fn parse(content: &str) -> Result<Self, CoreError> {
        toml::from_str(content).map_err(|e| CoreError::Configuration(ConfigError::ParseToml(e)))
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Load from `$WPA_SETTINGS` or `~/.config/wpa/settings.toml`. A missing
    /// file yields the defaults.
    pub fn load_default() -> Result<Self, CoreError> {
        match default_settings_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

pub fn default_settings_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(SETTINGS_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    let home = std::env::var("HOME").ok()?;
    Some(PathBuf::from(home).join(".config/wpa/settings.toml"))
}
