//! Suite configuration, fingerprints, environment identifiers and naming for wpa.
//!
//! This crate defines the schema layer: TOML suite configuration parsing
//! (`SuiteConfig`), the normalized representation (`NormalizedConfig`) that feeds
//! cache fingerprinting (`compute_fingerprint`), validated environment ids, the
//! container naming convention shared by every process that creates or destroys
//! environments, and the stack metadata document persisted into running stacks.

pub mod config;
pub mod identity;
pub mod meta;
pub mod naming;
pub mod normalize;
pub mod types;

pub use config::{
    parse_config_file, parse_config_str, ConfigError, DatabaseSection, RepoSection,
    ScriptsSection, SnapshotSection, StackSection, SuiteConfig,
};
pub use identity::compute_fingerprint;
pub use meta::{StackMeta, META_FILE_NAME, META_PATH};
pub use naming::{container_name, network_name, parse_container_name, ParsedName, Role, MARKER};
pub use normalize::{NormalizedConfig, NormalizedRepo, SnapshotSource};
pub use types::{EnvironmentId, Fingerprint};
