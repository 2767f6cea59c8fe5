use crate::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Everything needed to create one container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: Option<String>,
    /// Extra DNS names for this container on `network`.
    pub aliases: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    /// Overrides the image command when non-empty.
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerHandle {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Dead,
    Removing,
    Unknown,
}

impl ContainerState {
    /// Map the state word reported by `docker ps` / `podman ps`.
    pub fn from_engine(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "created" | "configured" | "initialized" => ContainerState::Created,
            "running" | "up" => ContainerState::Running,
            "paused" => ContainerState::Paused,
            "restarting" => ContainerState::Restarting,
            "exited" | "stopped" => ContainerState::Exited,
            "dead" => ContainerState::Dead,
            "removing" => ContainerState::Removing,
            _ => ContainerState::Unknown,
        }
    }
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContainerState::Created => "created",
            ContainerState::Running => "running",
            ContainerState::Paused => "paused",
            ContainerState::Restarting => "restarting",
            ContainerState::Exited => "exited",
            ContainerState::Dead => "dead",
            ContainerState::Removing => "removing",
            ContainerState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
}

/// Result of a command run inside a container. A nonzero `code` is not an
/// engine error: the engine did its job, the command failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub code: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

pub trait ContainerEngine: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    /// All containers known to the engine, running or not.
    fn list_containers(&self) -> Result<Vec<ContainerSummary>, EngineError>;

    fn create_network(&self, name: &str) -> Result<(), EngineError>;

    fn remove_network(&self, name: &str) -> Result<(), EngineError>;

    fn pull_image(&self, reference: &str) -> Result<(), EngineError>;

    fn create_container(&self, spec: &ContainerSpec) -> Result<ContainerHandle, EngineError>;

    fn start_container(&self, name: &str) -> Result<(), EngineError>;

    fn stop_container(&self, name: &str) -> Result<(), EngineError>;

    /// Remove a container, stopping it first if needed.
    fn remove_container(&self, name: &str) -> Result<(), EngineError>;

    fn exec(&self, container: &str, command: &[String]) -> Result<ExecOutput, EngineError>;

    /// Extract a tar archive into `dest_dir` inside the container, creating
    /// the directory if it does not exist.
    fn copy_into(&self, container: &str, dest_dir: &str, archive: &[u8])
        -> Result<(), EngineError>;
}

pub fn select_engine(name: &str) -> Result<Box<dyn ContainerEngine>, EngineError> {
    match name {
        "docker" => Ok(Box::new(crate::cli::CliEngine::docker())),
        "podman" => Ok(Box::new(crate::cli::CliEngine::podman())),
        "mock" => Ok(Box::new(crate::mock::MockEngine::new())),
        other => Err(EngineError::Unavailable(other.to_owned())),
    }
}
