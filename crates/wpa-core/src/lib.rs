//! Core orchestration for wpa test environments.
//!
//! This crate ties the suite configuration and container engine together into
//! the `Orchestrator`: the registry of live environments, the cache-or-build
//! decision, the fail-fast provisioning pipeline, and shutdown-time cleanup.
//! `Environment` implements the individual stack operations the pipeline runs.

pub mod archive;
pub mod cache;
pub mod concurrency;
pub mod environment;
pub mod lifecycle;
pub mod orchestrator;
pub mod pipeline;
pub mod settings;
pub mod snapshot;

pub use cache::{lookup_cached, CachedStack};
pub use concurrency::{install_signal_handler, shutdown_requested};
pub use environment::{Environment, EnvironmentOptions};
pub use lifecycle::{validate_transition, LifecycleState};
pub use orchestrator::{CreateOptions, Orchestrator};
pub use pipeline::{
    choose_strategy, run_pipeline, CacheFlags, ProvisionReport, Step, StepRunner, Strategy,
};
pub use settings::OrchestratorSettings;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Configuration(#[from] wpa_schema::ConfigError),
    #[error("engine error: {0}")]
    Engine(#[from] wpa_engine::EngineError),
    #[error("timed out after {seconds}s waiting for {what}")]
    Timeout { what: String, seconds: u64 },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("environment '{0}' is already registered")]
    DuplicateEnvironment(String),
    #[error("`{command}` failed in {container} (exit code {code}): {stderr}")]
    CommandFailed {
        container: String,
        command: String,
        code: i32,
        stderr: String,
    },
    #[error("snapshot error: {0}")]
    Snapshot(String),
    #[error("step '{step}' failed: {source}")]
    StepFailed {
        step: Step,
        source: Box<CoreError>,
    },
    #[error("orchestrator is shutting down")]
    ShuttingDown,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// The pipeline step a `StepFailed` error came from.
    pub fn failed_step(&self) -> Option<Step> {
        match self {
            CoreError::StepFailed { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// The innermost cause, looking through `StepFailed` wrappers.
    pub fn root_cause(&self) -> &CoreError {
        match self {
            CoreError::StepFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }
}
