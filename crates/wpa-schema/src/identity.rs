use crate::normalize::{NormalizedConfig, SnapshotSource};
use crate::types::Fingerprint;

/// Compute the cache fingerprint of a normalized suite configuration.
///
/// Two configurations with the same fingerprint describe the same stack: same
/// images, same host name, same data source, same repository mapping and the
/// same pre-test scripts. A cached environment is reused only when its stored
/// fingerprint equals the requested one.
pub fn compute_fingerprint(config: &NormalizedConfig) -> Result<Fingerprint, serde_json::Error> {
    let mut hasher = blake3::Hasher::new();

    hasher.update(config.canonical_json()?.as_bytes());

    hasher.update(format!("app:{}", config.app_image).as_bytes());
    hasher.update(format!("db:{}", config.db_image).as_bytes());
    hasher.update(format!("driver:{}", config.driver_image).as_bytes());
    hasher.update(format!("host:{}", config.site_host).as_bytes());

    if let Some(repo) = &config.repo {
        hasher.update(format!("repo:{}:{}", repo.host_path, repo.container_path).as_bytes());
        for pattern in &repo.exclude {
            hasher.update(format!("exclude:{pattern}").as_bytes());
        }
    }

    match &config.snapshot {
        Some(SnapshotSource::File(path)) => hasher.update(format!("snapshot:file:{path}").as_bytes()),
        Some(SnapshotSource::Url(url)) => hasher.update(format!("snapshot:url:{url}").as_bytes()),
        None => hasher.update(b"snapshot:none"),
    };

    hasher.update(format!("dbname:{}:{}", config.db_name, config.db_user).as_bytes());

    for (i, script) in config.before_scripts.iter().enumerate() {
        hasher.update(format!("script:{i}:{script}").as_bytes());
    }
    for (key, value) in &config.env {
        hasher.update(format!("env:{key}={value}").as_bytes());
    }

    Ok(Fingerprint::new(hasher.finalize().to_hex().to_string()))
}
