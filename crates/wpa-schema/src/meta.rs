use crate::naming::Role;
use crate::types::{EnvironmentId, Fingerprint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// File name of the metadata document inside the application container.
pub const META_FILE_NAME: &str = "wpa-meta.json";
/// Absolute path of the metadata document inside the application container.
pub const META_PATH: &str = "/wpa-meta.json";

/// Description of a provisioned stack, written into its application container.
///
/// Cache lookup reads this back to decide whether a running stack matches a
/// requested configuration, so it must stay readable by later versions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackMeta {
    pub env_id: EnvironmentId,
    pub fingerprint: Fingerprint,
    pub cacheable: bool,
    pub created_at: String,
    pub network: String,
    pub containers: BTreeMap<Role, String>,
    pub images: BTreeMap<Role, String>,
}

impl StackMeta {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::naming::{container_name, network_name};

    #[test]
    fn meta_json_roundtrip() {
        let id = EnvironmentId::parse("cached").unwrap();
        let meta = StackMeta {
            env_id: id.clone(),
            fingerprint: Fingerprint::new("ab".repeat(32)),
            cacheable: true,
            created_at: chrono::Utc::now().to_rfc3339(),
            network: network_name(&id),
            containers: Role::ALL
                .iter()
                .map(|r| (*r, container_name(&id, *r)))
                .collect(),
            images: BTreeMap::from([(Role::App, "wp:latest".to_owned())]),
        };

        let json = meta.to_json().unwrap();
        assert!(json.contains("\"db\": \"cached-wpa-db\""));
        let back = StackMeta::from_json(json.as_bytes()).unwrap();
        assert_eq!(back, meta);
    }

    #[test]
    fn rejects_invalid_env_id_in_meta() {
        let json = r#"{"env_id":"bad id","fingerprint":"x","cacheable":true,"created_at":"","network":"n","containers":{},"images":{}}"#;
        assert!(StackMeta::from_json(json.as_bytes()).is_err());
    }
}
