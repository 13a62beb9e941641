// ABOUTME: Container runtime abstraction used by the session manager
// ABOUTME: Defines the SandboxRuntime trait, container and exec specs, and runtime errors

use crate::profile::ResourceLimits;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

pub mod docker;
#[cfg(any(test, feature = "test-utils"))]
pub mod fake;

pub use docker::DockerRuntime;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Container not found: {0}")]
    NotFound(String),
    #[error("Container conflict: {0}")]
    Conflict(String),
    #[error("Container daemon unavailable: {0}")]
    Unavailable(String),
    #[error("Container daemon error ({status}): {message}")]
    Failed { status: u16, message: String },
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

#[derive(Debug, Clone, PartialEq)]
pub struct BindMount {
    pub host_path: String,
    pub container_path: String,
    pub readonly: bool,
}

/// Everything needed to create one owner's sandbox container.
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    pub image: String,
    /// Deterministic container name, unique per owner
    pub name: String,
    pub labels: HashMap<String, String>,
    pub mounts: Vec<BindMount>,
    pub working_dir: String,
    /// Long-running login shell that keeps the container alive
    pub command: Vec<String>,
    /// `uid:gid` the container processes run as
    pub user: Option<String>,
    pub limits: ResourceLimits,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecSpec {
    pub command: Vec<String>,
    pub working_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Removing,
    Exited,
    Dead,
    Unknown(String),
}

impl ContainerState {
    pub fn from_docker(state: &str) -> Self {
        match state.to_lowercase().as_str() {
            "created" => Self::Created,
            "running" => Self::Running,
            "paused" => Self::Paused,
            "restarting" => Self::Restarting,
            "removing" => Self::Removing,
            "exited" => Self::Exited,
            "dead" => Self::Dead,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Restarting)
    }
}

#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub state: ContainerState,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecOutput {
    pub exit_code: i64,
    /// stdout and stderr in arrival order
    pub output: Vec<u8>,
}

/// Thin wrapper over the container daemon.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Check that the daemon is reachable
    async fn ping(&self) -> Result<()>;

    /// Look a container up by id or name
    async fn inspect(&self, id_or_name: &str) -> Result<ContainerInfo>;

    /// Create and start a container, returning its id. Fails with `Conflict`
    /// when the name is already taken.
    async fn create_container(&self, spec: &SandboxSpec) -> Result<String>;

    /// Start an existing container. Starting a running container succeeds.
    async fn start_container(&self, id: &str) -> Result<()>;

    /// Stop a container, waiting up to `grace_secs` before killing it
    async fn stop_container(&self, id: &str, grace_secs: u64) -> Result<()>;

    async fn remove_container(&self, id_or_name: &str, force: bool) -> Result<()>;

    /// Run a command inside a running container and wait for it to finish
    async fn exec(&self, id: &str, spec: &ExecSpec) -> Result<ExecOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_state_from_docker() {
        assert_eq!(ContainerState::from_docker("running"), ContainerState::Running);
        assert_eq!(ContainerState::from_docker("Exited"), ContainerState::Exited);
        assert_eq!(
            ContainerState::from_docker("weird"),
            ContainerState::Unknown("weird".to_string())
        );
        assert!(ContainerState::Restarting.is_running());
        assert!(!ContainerState::Created.is_running());
        assert!(!ContainerState::Paused.is_running());
    }
}
