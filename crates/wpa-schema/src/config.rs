use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read suite config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse suite config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported config_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("stack.{0} must not be empty")]
    EmptyImage(&'static str),
    #[error("stack.site_host must not be empty")]
    EmptySiteHost,
    #[error("stack.site_host '{0}' is not a valid host name")]
    InvalidSiteHost(String),
    #[error("repo.container_path must be an absolute path, got '{0}'")]
    InvalidRepoTarget(String),
    #[error("invalid environment id '{id}': {reason}")]
    InvalidEnvironmentId { id: String, reason: String },
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SuiteConfig {
    pub config_version: u32,
    pub stack: StackSection,
    #[serde(default)]
    pub repo: Option<RepoSection>,
    #[serde(default)]
    pub snapshot: Option<SnapshotSection>,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub scripts: ScriptsSection,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct StackSection {
    pub app_image: String,
    pub db_image: String,
    #[serde(default = "default_driver_image")]
    pub driver_image: String,
    #[serde(default = "default_site_host")]
    pub site_host: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RepoSection {
    #[serde(default = "default_repo_path")]
    pub path: String,
    pub container_path: String,
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SnapshotSection {
    pub source: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    #[serde(default = "default_db_name")]
    pub name: String,
    #[serde(default = "default_db_user")]
    pub user: String,
    #[serde(default = "default_db_password")]
    pub password: String,
    #[serde(default)]
    pub wait_seconds: Option<u64>,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            name: default_db_name(),
            user: default_db_user(),
            password: default_db_password(),
            wait_seconds: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ScriptsSection {
    #[serde(default)]
    pub before: Vec<String>,
}

fn default_driver_image() -> String {
    "selenium/standalone-chrome:3.141".to_owned()
}

fn default_site_host() -> String {
    "wpa.test".to_owned()
}

fn default_repo_path() -> String {
    ".".to_owned()
}

fn default_db_name() -> String {
    "wordpress".to_owned()
}

fn default_db_user() -> String {
    "wordpress".to_owned()
}

fn default_db_password() -> String {
    "password".to_owned()
}

pub fn parse_config_str(input: &str) -> Result<SuiteConfig, ConfigError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_config_file(path: impl AsRef<Path>) -> Result<SuiteConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_config_str(&content)
}
