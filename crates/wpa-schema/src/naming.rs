//! Container and network naming convention.
//!
//! Every managed container is named `<environment id>-wpa-<role>`. Any process
//! can rediscover an environment's resources from an engine listing alone, so
//! this format is a compatibility contract: both the creating and the
//! destroying side must go through these helpers.

use crate::types::EnvironmentId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Token separating the environment id from the role suffix.
pub const MARKER: &str = "-wpa";

const NETWORK_SUFFIX: &str = "network";

/// Logical role of a container inside one environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    App,
    #[serde(rename = "db")]
    Database,
    Driver,
}

impl Role {
    /// All roles in creation order.
    pub const ALL: [Role; 3] = [Role::Database, Role::App, Role::Driver];

    pub fn suffix(self) -> &'static str {
        match self {
            Role::App => "app",
            Role::Database => "db",
            Role::Driver => "driver",
        }
    }

    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "app" => Some(Role::App),
            "db" => Some(Role::Database),
            "driver" => Some(Role::Driver),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

pub fn container_name(id: &EnvironmentId, role: Role) -> String {
    format!("{id}{MARKER}-{}", role.suffix())
}

pub fn network_name(id: &EnvironmentId) -> String {
    format!("{id}{MARKER}-{NETWORK_SUFFIX}")
}

/// A container name split back into its environment id and suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    pub env_id: EnvironmentId,
    /// Text after the marker with its leading `-` removed. May be empty.
    pub suffix: String,
}

impl ParsedName {
    pub fn role(&self) -> Option<Role> {
        Role::from_suffix(&self.suffix)
    }
}

/// Parse a container name produced by [`container_name`].
///
/// Engines list names with a leading `/`, which is stripped. The id is
/// everything before the last marker occurrence. Names without the marker,
/// or whose id part is not a valid [`EnvironmentId`], are not managed.
pub fn parse_container_name(name: &str) -> Option<ParsedName> {
    let name = name.strip_prefix('/').unwrap_or(name);
    let idx = name.rfind(MARKER)?;
    let env_id = EnvironmentId::parse(&name[..idx]).ok()?;
    let rest = &name[idx + MARKER.len()..];
    let suffix = rest.strip_prefix('-').unwrap_or(rest).to_owned();
    Some(ParsedName { env_id, suffix })
}
