// ABOUTME: Per-owner sandbox session management for Codenest
// ABOUTME: One Docker container per user or project, reused, resource-limited, idled out and torn down

pub mod gateway;
pub mod idle;
pub mod manager;
pub mod profile;
pub mod runtime;
pub mod settings;
pub mod storage;

pub use gateway::{CommandGateway, CommandResponse, TerminalMessage};
pub use manager::{
    CommandResult, RecoveryReport, SandboxHandle, SessionError, SessionManager, SessionState,
    SessionStatus,
};
pub use profile::{Owner, OwnerId, ProfileError, ResourceLimits, ResourceProfile};
pub use runtime::{DockerRuntime, RuntimeError, SandboxRuntime};
pub use settings::{default_resource_profile, ManagerSettings};
pub use storage::{SandboxSession, SandboxStatus, SessionStorage, StorageError};
