use crate::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Provisioning progress of one environment. Variants are declared in
/// pipeline order, so the derived `Ord` is the forward direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Unprovisioned,
    NetworkReady,
    ContainersRunning,
    HostsConfigured,
    DataLoaded,
    ReadyForTests,
    Destroyed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Unprovisioned => "unprovisioned",
            LifecycleState::NetworkReady => "network_ready",
            LifecycleState::ContainersRunning => "containers_running",
            LifecycleState::HostsConfigured => "hosts_configured",
            LifecycleState::DataLoaded => "data_loaded",
            LifecycleState::ReadyForTests => "ready_for_tests",
            LifecycleState::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

pub fn validate_transition(from: LifecycleState, to: LifecycleState) -> Result<(), CoreError> {
    let valid = from == to
        || matches!(
            (from, to),
            (
                LifecycleState::Unprovisioned
                    | LifecycleState::NetworkReady
                    | LifecycleState::ContainersRunning
                    | LifecycleState::HostsConfigured
                    | LifecycleState::DataLoaded
                    | LifecycleState::ReadyForTests,
                LifecycleState::Destroyed
            )
        )
        || (from != LifecycleState::Destroyed && to > from);

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
