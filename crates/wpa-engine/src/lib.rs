//! Container engine backends for wpa environments.
//!
//! This crate implements the execution layer: the pluggable `ContainerEngine`
//! trait covering containers, networks, images, exec and archive copy; a
//! backend that drives the `docker` or `podman` command line; an in-memory
//! mock backend with failure injection for tests; and prerequisite checks.

pub mod backend;
pub mod cli;
pub mod mock;
pub mod prereq;

pub use backend::{
    select_engine, ContainerEngine, ContainerHandle, ContainerSpec, ContainerState,
    ContainerSummary, ExecOutput,
};
pub use cli::CliEngine;
pub use mock::MockEngine;
pub use prereq::{check_engine_prereqs, format_missing, MissingPrereq};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("container engine '{0}' is not available on this system")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    Conflict(String),
    #[error("{operation} rejected by engine: {reason}")]
    Rejected { operation: String, reason: String },
    #[error("unexpected engine output: {0}")]
    Parse(String),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::NotFound(_))
    }
}
