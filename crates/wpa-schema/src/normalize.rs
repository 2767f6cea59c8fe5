use crate::config::{ConfigError, SuiteConfig};
use crate::naming::Role;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Canonical representation of a parsed suite configuration.
///
/// Strings are trimmed, host paths are resolved against the directory holding
/// the config file, and list fields are ordered deterministically where order
/// carries no meaning. This is the input to fingerprinting and to every
/// provisioning step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedConfig {
    pub config_version: u32,
    pub app_image: String,
    pub db_image: String,
    pub driver_image: String,
    pub site_host: String,
    pub repo: Option<NormalizedRepo>,
    pub snapshot: Option<SnapshotSource>,
    pub db_name: String,
    pub db_user: String,
    pub db_password: String,
    pub db_wait_seconds: Option<u64>,
    /// Run in declaration order.
    pub before_scripts: Vec<String>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NormalizedRepo {
    pub host_path: String,
    pub container_path: String,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "location", rename_all = "lowercase")]
pub enum SnapshotSource {
    File(String),
    Url(String),
}

impl SuiteConfig {
    /// Validate and normalize. Relative host paths are resolved against `base_dir`.
    pub fn normalize(&self, base_dir: &Path) -> Result<NormalizedConfig, ConfigError> {
        if self.config_version != 1 {
            return Err(ConfigError::UnsupportedVersion(self.config_version));
        }

        let app_image = non_empty(&self.stack.app_image, "app_image")?;
        let db_image = non_empty(&self.stack.db_image, "db_image")?;
        let driver_image = non_empty(&self.stack.driver_image, "driver_image")?;

        let site_host = self.stack.site_host.trim().to_owned();
        if site_host.is_empty() {
            return Err(ConfigError::EmptySiteHost);
        }
        if !is_host_name(&site_host) {
            return Err(ConfigError::InvalidSiteHost(site_host));
        }

        let repo = match &self.repo {
            Some(section) => {
                let container_path = section.container_path.trim().trim_end_matches('/');
                if !container_path.starts_with('/') {
                    return Err(ConfigError::InvalidRepoTarget(
                        section.container_path.clone(),
                    ));
                }
                Some(NormalizedRepo {
                    host_path: resolve_host_path(base_dir, section.path.trim()),
                    container_path: container_path.to_owned(),
                    exclude: normalize_string_list(&section.exclude),
                })
            }
            None => None,
        };

        let snapshot = self.snapshot.as_ref().and_then(|s| {
            let source = s.source.trim();
            if source.is_empty() {
                None
            } else if source.starts_with("http://") || source.starts_with("https://") {
                Some(SnapshotSource::Url(source.to_owned()))
            } else {
                Some(SnapshotSource::File(resolve_host_path(base_dir, source)))
            }
        });

        let before_scripts = self
            .scripts
            .before
            .iter()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();

        let env = self
            .env
            .iter()
            .map(|(k, v)| (k.trim().to_owned(), v.clone()))
            .filter(|(k, _)| !k.is_empty())
            .collect();

        Ok(NormalizedConfig {
            config_version: self.config_version,
            app_image,
            db_image,
            driver_image,
            site_host,
            repo,
            snapshot,
            db_name: self.database.name.trim().to_owned(),
            db_user: self.database.user.trim().to_owned(),
            db_password: self.database.password.clone(),
            db_wait_seconds: self.database.wait_seconds,
            before_scripts,
            env,
        })
    }
}

impl NormalizedConfig {
    /// Canonical JSON of the stack-defining fields.
    ///
    /// The database wait threshold is excluded: it changes how long we are
    /// willing to wait, not what gets built.
    pub fn canonical_json(&self) -> Result<String, serde_json::Error> {
        let mut copy = self.clone();
        copy.db_wait_seconds = None;
        serde_json::to_string(&copy)
    }

    pub fn image(&self, role: Role) -> &str {
        match role {
            Role::App => &self.app_image,
            Role::Database => &self.db_image,
            Role::Driver => &self.driver_image,
        }
    }
}

fn non_empty(value: &str, field: &'static str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyImage(field));
    }
    Ok(trimmed.to_owned())
}

/// Letters, digits, `-` and `.` only. The name ends up in `/etc/hosts`.
fn is_host_name(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
        && !value.starts_with(['-', '.'])
}

fn resolve_host_path(base_dir: &Path, raw: &str) -> String {
    let path = Path::new(raw);
    if path.is_absolute() {
        raw.to_owned()
    } else {
        base_dir.join(path).to_string_lossy().into_owned()
    }
}

fn normalize_string_list(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = values
        .iter()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}
