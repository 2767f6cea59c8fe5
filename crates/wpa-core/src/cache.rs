use crate::CoreError;
use std::collections::BTreeMap;
use tracing::debug;
use wpa_engine::{ContainerEngine, ContainerState, ContainerSummary};
use wpa_schema::{parse_container_name, EnvironmentId, Fingerprint, Role, StackMeta, META_PATH};

/// A running stack whose metadata matches a requested fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedStack {
    pub env_id: EnvironmentId,
    pub meta: StackMeta,
    /// Existing containers of the stack by role, as listed by the engine.
    pub containers: BTreeMap<Role, ContainerSummary>,
}

/// Group the engine's managed containers by environment id.
fn managed_stacks(
    engine: &dyn ContainerEngine,
) -> Result<BTreeMap<EnvironmentId, BTreeMap<Role, ContainerSummary>>, CoreError> {
    let mut stacks: BTreeMap<EnvironmentId, BTreeMap<Role, ContainerSummary>> = BTreeMap::new();
    for summary in engine.list_containers()? {
        let Some(parsed) = parse_container_name(&summary.name) else {
            continue;
        };
        let Some(role) = parsed.role() else {
            continue;
        };
        stacks.entry(parsed.env_id).or_default().insert(role, summary);
    }
    Ok(stacks)
}

fn read_meta(engine: &dyn ContainerEngine, app_container: &str) -> Option<StackMeta> {
    let command = vec!["cat".to_owned(), META_PATH.to_owned()];
    let output = match engine.exec(app_container, &command) {
        Ok(o) => o,
        Err(e) => {
            debug!("cannot read metadata from {app_container}: {e}");
            return None;
        }
    };
    if !output.success() {
        debug!(
            "no metadata in {app_container}: {}",
            output.stderr_lossy().trim()
        );
        return None;
    }
    match StackMeta::from_json(&output.stdout) {
        Ok(meta) => Some(meta),
        Err(e) => {
            debug!("unreadable metadata in {app_container}: {e}");
            None
        }
    }
}

/// Find a running, cacheable stack built from the same configuration.
///
/// Stacks are examined in environment id order. When `wanted` is given only
/// that environment is considered. A stack qualifies when its application
/// and database containers are running and the metadata in the application
/// container carries `fingerprint`, is marked cacheable, and names the same
/// environment id as the containers.
pub fn lookup_cached(
    engine: &dyn ContainerEngine,
    fingerprint: &Fingerprint,
    wanted: Option<&EnvironmentId>,
) -> Result<Option<CachedStack>, CoreError> {
    for (env_id, containers) in managed_stacks(engine)? {
        if wanted.is_some_and(|w| *w != env_id) {
            continue;
        }

        let running = |role: Role| {
            containers
                .get(&role)
                .is_some_and(|c| c.state == ContainerState::Running)
        };
        if !running(Role::App) || !running(Role::Database) {
            debug!("skipping {env_id}: application or database container not running");
            continue;
        }

        let Some(app) = containers.get(&Role::App) else {
            continue;
        };
        let Some(meta) = read_meta(engine, app.name.trim_start_matches('/')) else {
            continue;
        };

        if meta.env_id != env_id {
            debug!("skipping {env_id}: metadata belongs to {}", meta.env_id);
            continue;
        }
        if !meta.cacheable {
            debug!("skipping {env_id}: not cacheable");
            continue;
        }
        if meta.fingerprint != *fingerprint {
            debug!(
                "skipping {env_id}: fingerprint {} differs",
                meta.fingerprint.short()
            );
            continue;
        }

        debug!("cache hit: {env_id}");
        return Ok(Some(CachedStack {
            env_id,
            meta,
            containers,
        }));
    }
    Ok(None)
}
