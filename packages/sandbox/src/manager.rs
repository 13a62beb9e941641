// ABOUTME: Sandbox session lifecycle manager orchestrating storage and runtime operations
// ABOUTME: Reuses, starts, creates, idles out and deletes one container per owner, serialized per owner

use crate::idle::IdleTimers;
use crate::profile::{Owner, OwnerId, ProfileError};
use crate::runtime::{
    BindMount, ContainerInfo, ExecSpec, RuntimeError, SandboxRuntime, SandboxSpec,
};
use crate::settings::{ManagerSettings, VOLUME_MOUNT, WORKSPACE_MOUNT};
use crate::storage::{SandboxSession, SandboxStatus, SessionStorage, StorageError};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Sandbox runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("Sandbox not found: {0}")]
    SandboxNotFound(String),

    #[error("Sandbox name conflict: {0}")]
    CreationConflict(String),

    #[error("Command execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Command timed out after {seconds} seconds")]
    ExecTimeout { seconds: u64 },

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    #[error("Workspace not found: {0}")]
    WorkspaceMissing(String),

    #[error("Invalid resource profile: {0}")]
    InvalidProfile(#[from] ProfileError),

    #[error("Runtime error: {0}")]
    Runtime(RuntimeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RuntimeError> for SessionError {
    fn from(error: RuntimeError) -> Self {
        match error {
            RuntimeError::NotFound(id) => Self::SandboxNotFound(id),
            RuntimeError::Unavailable(message) => Self::RuntimeUnavailable(message),
            other => Self::Runtime(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Output of one command. A non-zero exit code is still a successful execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandResult {
    pub output: String,
    pub exit_code: i64,
}

/// A running sandbox as returned by `ensure_running`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SandboxHandle {
    pub container_ref: String,
    pub container_name: String,
    pub status: SandboxStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Absent,
    Running,
    Stopped,
    Removed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub owner_id: OwnerId,
    pub state: SessionState,
    pub session: Option<SandboxSession>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Running sandboxes whose idle timer was re-armed
    pub rearmed: usize,
    /// Running sandboxes already past their idle timeout
    pub expired: usize,
    /// Records marked Stopped because the container was no longer running
    pub stopped: usize,
    /// Records marked Stopped because their container no longer exists
    pub missing: usize,
    pub failed: usize,
}

struct ManagerInner {
    storage: Arc<SessionStorage>,
    runtime: Arc<dyn SandboxRuntime>,
    settings: ManagerSettings,
    owner_locks: RwLock<HashMap<OwnerId, Arc<Mutex<()>>>>,
    timers: IdleTimers,
    /// Commands currently executing per owner; idle expiry never stops these
    in_flight: std::sync::Mutex<HashMap<OwnerId, usize>>,
}

impl ManagerInner {
    fn in_flight_count(&self, owner_id: &OwnerId) -> usize {
        let counts = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        counts.get(owner_id).copied().unwrap_or(0)
    }
}

/// Marks one command as executing until dropped
struct InFlightExec {
    inner: Arc<ManagerInner>,
    owner_id: OwnerId,
}

impl InFlightExec {
    fn begin(inner: &Arc<ManagerInner>, owner_id: &OwnerId) -> Self {
        let mut counts = inner
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *counts.entry(owner_id.clone()).or_insert(0) += 1;

        Self {
            inner: inner.clone(),
            owner_id: owner_id.clone(),
        }
    }
}

impl Drop for InFlightExec {
    fn drop(&mut self) {
        let mut counts = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(count) = counts.get_mut(&self.owner_id) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&self.owner_id);
            }
        }
    }
}

/// Sandbox session manager. Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(
        storage: Arc<SessionStorage>,
        runtime: Arc<dyn SandboxRuntime>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                storage,
                runtime,
                settings,
                owner_locks: RwLock::new(HashMap::new()),
                timers: IdleTimers::new(),
                in_flight: std::sync::Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.inner.settings
    }

    pub fn storage(&self) -> &Arc<SessionStorage> {
        &self.inner.storage
    }

    pub fn runtime(&self) -> &Arc<dyn SandboxRuntime> {
        &self.inner.runtime
    }

    async fn lock_owner(&self, owner_id: &OwnerId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.owner_locks.write().await;
            locks
                .entry(owner_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Current session for an owner, with `status` taken from the runtime.
    /// Returns `None` when there is no record or the container is gone.
    pub async fn get_session(&self, owner_id: &OwnerId) -> Result<Option<SandboxSession>> {
        Ok(self
            .resolve(owner_id)
            .await?
            .map(|(mut session, info)| {
                session.status = live_status(&info);
                session
            }))
    }

    /// Stored record plus the live container it points at
    async fn resolve(&self, owner_id: &OwnerId) -> Result<Option<(SandboxSession, ContainerInfo)>> {
        let Some(session) = self.inner.storage.get(owner_id).await? else {
            return Ok(None);
        };
        if session.status == SandboxStatus::Removed {
            return Ok(None);
        }
        let Some(container_ref) = session.container_ref.clone() else {
            return Ok(None);
        };

        match self.inner.runtime.inspect(&container_ref).await {
            Ok(info) => Ok(Some((session, info))),
            Err(e) => match SessionError::from(e) {
                SessionError::SandboxNotFound(_) => {
                    debug!(owner = %owner_id, container = %container_ref, "Recorded sandbox no longer exists");
                    Ok(None)
                }
                other => Err(other),
            },
        }
    }

    pub async fn status(&self, owner_id: &OwnerId) -> Result<SessionStatus> {
        let record = self.inner.storage.get(owner_id).await?;

        let (state, session) = match record {
            None => (SessionState::Absent, None),
            Some(record) if record.status == SandboxStatus::Removed => {
                (SessionState::Removed, Some(record))
            }
            Some(record) => match self.get_session(owner_id).await? {
                Some(live) if live.status == SandboxStatus::Running => {
                    (SessionState::Running, Some(live))
                }
                Some(live) => (SessionState::Stopped, Some(live)),
                None => (SessionState::Absent, Some(record)),
            },
        };

        Ok(SessionStatus {
            owner_id: owner_id.clone(),
            state,
            session,
        })
    }

    pub async fn list_sessions(&self) -> Result<Vec<SandboxSession>> {
        Ok(self.inner.storage.list(None).await?)
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Reuse, restart or create the owner's sandbox and return it running
    pub async fn ensure_running(&self, owner: &Owner) -> Result<SandboxHandle> {
        let _guard = self.lock_owner(&owner.id).await;
        self.ensure_running_locked(owner).await
    }

    async fn ensure_running_locked(&self, owner: &Owner) -> Result<SandboxHandle> {
        let handle = match self.resolve(&owner.id).await? {
            Some((session, info)) if info.state.is_running() => {
                if session.status != SandboxStatus::Running {
                    self.inner
                        .storage
                        .update_status(&owner.id, SandboxStatus::Running)
                        .await?;
                }
                running_handle(&session, info.id)
            }
            Some((session, info)) => match self.start_existing(&owner.id, &info.id).await {
                Ok(()) => running_handle(&session, info.id),
                Err(SessionError::SandboxNotFound(_)) => {
                    warn!(owner = %owner.id, "Sandbox disappeared before it could be started, creating a new one");
                    self.create_sandbox(owner).await?
                }
                Err(e) => return Err(e),
            },
            None => self.create_sandbox(owner).await?,
        };

        self.record_activity(&owner.id).await;
        self.arm_idle_timer(&owner.id, self.inner.settings.idle_timeout);
        Ok(handle)
    }

    async fn start_existing(&self, owner_id: &OwnerId, container_ref: &str) -> Result<()> {
        self.inner.runtime.start_container(container_ref).await?;
        self.inner
            .storage
            .update_status(owner_id, SandboxStatus::Running)
            .await?;
        info!(owner = %owner_id, container = %container_ref, "Sandbox restarted");
        Ok(())
    }

    async fn create_sandbox(&self, owner: &Owner) -> Result<SandboxHandle> {
        let settings = &self.inner.settings;
        let limits = owner.resource_profile.limits()?;

        let workspace = match tokio::fs::metadata(&owner.workspace_path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::canonicalize(&owner.workspace_path).await?,
            _ => {
                return Err(SessionError::WorkspaceMissing(
                    owner.workspace_path.display().to_string(),
                ))
            }
        };

        let container_name = settings.container_name(&owner.id);
        let volume_path = settings.volume_path(&owner.id);
        tokio::fs::create_dir_all(&volume_path).await?;
        // Docker treats relative bind sources as named volumes
        let volume_path = tokio::fs::canonicalize(&volume_path).await?;

        let user = match &settings.sandbox_user {
            Some(user) => Some(user.clone()),
            None => directory_owner(&workspace).await,
        };

        let spec = SandboxSpec {
            image: settings.image.clone(),
            name: container_name.clone(),
            labels: HashMap::from([("codenest.owner".to_string(), owner.id.to_string())]),
            mounts: vec![
                BindMount {
                    host_path: workspace.display().to_string(),
                    container_path: WORKSPACE_MOUNT.to_string(),
                    readonly: false,
                },
                BindMount {
                    host_path: volume_path.display().to_string(),
                    container_path: VOLUME_MOUNT.to_string(),
                    readonly: false,
                },
            ],
            working_dir: WORKSPACE_MOUNT.to_string(),
            command: vec![settings.shell.clone(), "-l".to_string()],
            user,
            limits,
        };

        // Anything already holding our name is left over from an earlier run
        self.remove_stale_container(&container_name).await?;

        let container_ref = match self.try_create(&spec).await {
            Err(SessionError::CreationConflict(message)) => {
                warn!(
                    owner = %owner.id,
                    container = %container_name,
                    "Container name still taken ({}), removing and retrying once",
                    message
                );
                self.remove_stale_container(&container_name).await?;
                match self.try_create(&spec).await {
                    Err(SessionError::CreationConflict(message)) => {
                        return Err(SessionError::RuntimeUnavailable(format!(
                            "container name {} is still in use after forced removal: {}",
                            container_name, message
                        )))
                    }
                    other => other?,
                }
            }
            other => other?,
        };

        let now = Utc::now();
        let session = SandboxSession {
            owner_id: owner.id.clone(),
            container_ref: Some(container_ref.clone()),
            container_name: container_name.clone(),
            status: SandboxStatus::Running,
            mounted_volume_path: volume_path.display().to_string(),
            workspace_path: workspace.display().to_string(),
            resource_profile: owner.resource_profile.clone(),
            created_at: now,
            last_activity_at: Some(now),
        };
        self.inner.storage.upsert(&session).await?;

        info!(owner = %owner.id, container = %container_name, "Sandbox created");

        Ok(SandboxHandle {
            container_ref,
            container_name,
            status: SandboxStatus::Running,
        })
    }

    async fn try_create(&self, spec: &SandboxSpec) -> Result<String> {
        match self.inner.runtime.create_container(spec).await {
            Ok(id) => Ok(id),
            Err(RuntimeError::Conflict(message)) => Err(SessionError::CreationConflict(message)),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_stale_container(&self, name: &str) -> Result<()> {
        match self.inner.runtime.remove_container(name, true).await {
            Ok(()) => {
                warn!(container = %name, "Removed stale container");
                Ok(())
            }
            Err(RuntimeError::NotFound(_)) => Ok(()),
            Err(e) => Err(SessionError::RuntimeUnavailable(e.to_string())),
        }
    }

    /// Run `command` in the owner's sandbox, bootstrapping it if needed
    pub async fn execute(
        &self,
        owner: &Owner,
        command: &str,
        working_directory: Option<&str>,
    ) -> Result<CommandResult> {
        if command.contains('\0') {
            return Err(SessionError::InvalidCommand(
                "command contains a NUL byte".to_string(),
            ));
        }
        if working_directory.is_some_and(|dir| dir.contains('\0')) {
            return Err(SessionError::InvalidCommand(
                "working directory contains a NUL byte".to_string(),
            ));
        }

        // Registered under the owner lock so idle expiry sees the command
        // before it can take the lock itself
        let handle = {
            let _guard = self.lock_owner(&owner.id).await;
            self.ensure_running_locked(owner)
                .await
                .map(|handle| (handle, InFlightExec::begin(&self.inner, &owner.id)))
        };

        let result = match handle {
            Ok((handle, _in_flight)) => {
                self.run_command(&owner.id, &handle, command, working_directory)
                    .await
            }
            Err(e) => Err(e),
        };

        self.record_activity(&owner.id).await;
        self.arm_idle_timer(&owner.id, self.inner.settings.idle_timeout);
        result
    }

    async fn run_command(
        &self,
        owner_id: &OwnerId,
        handle: &SandboxHandle,
        command: &str,
        working_directory: Option<&str>,
    ) -> Result<CommandResult> {
        let spec = ExecSpec {
            command: vec![
                self.inner.settings.shell.clone(),
                "-lc".to_string(),
                command.to_string(),
            ],
            working_dir: Some(working_directory.unwrap_or(WORKSPACE_MOUNT).to_string()),
        };
        let timeout = self.inner.settings.exec_timeout;

        debug!(owner = %owner_id, container = %handle.container_name, "Executing command");

        match tokio::time::timeout(timeout, self.inner.runtime.exec(&handle.container_ref, &spec))
            .await
        {
            Err(_) => {
                warn!(owner = %owner_id, "Command exceeded {:?}", timeout);
                Err(SessionError::ExecTimeout {
                    seconds: timeout.as_secs(),
                })
            }
            Ok(Err(RuntimeError::Unavailable(message))) => {
                Err(SessionError::RuntimeUnavailable(message))
            }
            Ok(Err(e)) => Err(SessionError::ExecutionFailed(e.to_string())),
            Ok(Ok(output)) => Ok(CommandResult {
                output: String::from_utf8_lossy(&output.output).trim().to_string(),
                exit_code: output.exit_code,
            }),
        }
    }

    /// Stop the owner's sandbox. Returns false when nothing was running.
    pub async fn stop(&self, owner_id: &OwnerId) -> Result<bool> {
        let _guard = self.lock_owner(owner_id).await;
        self.inner.timers.cancel(owner_id);

        let Some((session, info)) = self.resolve(owner_id).await? else {
            // Container is gone; a Running record would outlive it
            self.inner
                .storage
                .compare_and_set_status(owner_id, SandboxStatus::Running, SandboxStatus::Stopped)
                .await?;
            return Ok(false);
        };

        let was_running = info.state.is_running();
        if was_running {
            self.stop_container(&info.id).await?;
            info!(owner = %owner_id, container = %session.container_name, "Sandbox stopped");
        }
        if session.status != SandboxStatus::Stopped {
            self.inner
                .storage
                .update_status(owner_id, SandboxStatus::Stopped)
                .await?;
        }

        Ok(was_running)
    }

    async fn stop_container(&self, container_ref: &str) -> Result<()> {
        let grace = self.inner.settings.stop_grace.as_secs();
        match self.inner.runtime.stop_container(container_ref, grace).await {
            Ok(()) | Err(RuntimeError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Force-remove the owner's sandbox and mark the record Removed.
    /// The workspace directory is left untouched.
    pub async fn delete(&self, owner_id: &OwnerId) -> Result<()> {
        let _guard = self.lock_owner(owner_id).await;
        self.delete_locked(owner_id).await
    }

    async fn delete_locked(&self, owner_id: &OwnerId) -> Result<()> {
        self.inner.timers.cancel(owner_id);

        let record = self.inner.storage.get(owner_id).await?;
        let target = record
            .as_ref()
            .and_then(|session| session.container_ref.clone())
            .unwrap_or_else(|| self.inner.settings.container_name(owner_id));

        match self.inner.runtime.remove_container(&target, true).await {
            Ok(()) => info!(owner = %owner_id, container = %target, "Sandbox removed"),
            Err(RuntimeError::NotFound(_)) => {
                debug!(owner = %owner_id, container = %target, "Sandbox already gone")
            }
            Err(e) => return Err(e.into()),
        }

        if record.is_some() {
            self.inner
                .storage
                .update_status(owner_id, SandboxStatus::Removed)
                .await?;
        }

        Ok(())
    }

    /// Delete the sandbox and hard-delete its record, for owner or project deletion
    pub async fn purge(&self, owner_id: &OwnerId) -> Result<bool> {
        let _guard = self.lock_owner(owner_id).await;
        self.delete_locked(owner_id).await?;
        Ok(self.inner.storage.purge(owner_id).await?)
    }

    // ========================================================================
    // IDLE EXPIRY
    // ========================================================================

    fn arm_idle_timer(&self, owner_id: &OwnerId, delay: Duration) {
        let inner = Arc::downgrade(&self.inner);
        let key = owner_id.clone();

        self.inner.timers.arm(owner_id, delay, move || async move {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let manager = SessionManager { inner };
            if let Err(e) = manager.expire_idle(&key).await {
                error!(owner = %key, "Failed to stop idle sandbox: {}", e);
            }
        });
    }

    /// Stop the owner's sandbox if it has been idle for the full timeout.
    /// Returns true when this call performed the Running → Stopped transition.
    async fn expire_idle(&self, owner_id: &OwnerId) -> Result<bool> {
        let _guard = self.lock_owner(owner_id).await;

        let Some(session) = self.inner.storage.get(owner_id).await? else {
            return Ok(false);
        };
        if session.status != SandboxStatus::Running {
            return Ok(false);
        }

        let timeout = self.inner.settings.idle_timeout;
        let running_commands = self.inner.in_flight_count(owner_id);
        if running_commands > 0 {
            if !self.inner.timers.is_armed(owner_id) {
                self.arm_idle_timer(owner_id, timeout);
            }
            debug!(owner = %owner_id, "{} commands still running, not stopping", running_commands);
            return Ok(false);
        }

        if let Some(last_activity) = session.last_activity_at {
            let idle_for = (Utc::now() - last_activity).to_std().unwrap_or_default();
            if idle_for < timeout {
                if !self.inner.timers.is_armed(owner_id) {
                    self.arm_idle_timer(owner_id, timeout - idle_for);
                }
                debug!(owner = %owner_id, "Sandbox active {:?} ago, not stopping", idle_for);
                return Ok(false);
            }
        }

        if let Some(container_ref) = session.container_ref.as_deref() {
            self.stop_container(container_ref).await?;
        }

        let stopped = self
            .inner
            .storage
            .compare_and_set_status(owner_id, SandboxStatus::Running, SandboxStatus::Stopped)
            .await?;
        if stopped {
            info!(owner = %owner_id, container = %session.container_name, "Sandbox stopped after {:?} idle", timeout);
        }
        Ok(stopped)
    }

    async fn record_activity(&self, owner_id: &OwnerId) {
        match self.inner.storage.touch(owner_id, Utc::now()).await {
            Ok(()) | Err(StorageError::NotFound(_)) => {}
            Err(e) => warn!(owner = %owner_id, "Failed to record activity: {}", e),
        }
    }

    // ========================================================================
    // STARTUP AND SHUTDOWN
    // ========================================================================

    /// Reconcile Running records with the runtime after a restart and re-arm
    /// idle timers from each record's last activity
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let timeout = self.inner.settings.idle_timeout;
        let mut report = RecoveryReport::default();

        for session in self.inner.storage.list(Some(SandboxStatus::Running)).await? {
            let owner_id = session.owner_id.clone();
            let _guard = self.lock_owner(&owner_id).await;

            match self.resolve(&owner_id).await {
                Ok(Some((_, info))) if info.state.is_running() => {
                    let idle_for = session
                        .last_activity_at
                        .map(|at| (Utc::now() - at).to_std().unwrap_or_default())
                        .unwrap_or_default();
                    let remaining = timeout.saturating_sub(idle_for);
                    if remaining.is_zero() {
                        report.expired += 1;
                    } else {
                        report.rearmed += 1;
                    }
                    self.arm_idle_timer(&owner_id, remaining);
                }
                Ok(Some(_)) => {
                    self.inner
                        .storage
                        .compare_and_set_status(
                            &owner_id,
                            SandboxStatus::Running,
                            SandboxStatus::Stopped,
                        )
                        .await?;
                    report.stopped += 1;
                }
                Ok(None) => {
                    self.inner
                        .storage
                        .compare_and_set_status(
                            &owner_id,
                            SandboxStatus::Running,
                            SandboxStatus::Stopped,
                        )
                        .await?;
                    warn!(owner = %owner_id, "Sandbox missing from runtime, it will be recreated on next use");
                    report.missing += 1;
                }
                Err(e) => {
                    warn!(owner = %owner_id, "Failed to reconcile sandbox: {}", e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Recovered sandbox sessions: {} re-armed, {} expired, {} stopped, {} missing, {} failed",
            report.rearmed, report.expired, report.stopped, report.missing, report.failed
        );
        Ok(report)
    }

    /// Cancel every armed idle timer
    pub fn shutdown(&self) {
        self.inner.timers.cancel_all();
        info!("Session manager shut down");
    }
}

fn live_status(info: &ContainerInfo) -> SandboxStatus {
    if info.state.is_running() {
        SandboxStatus::Running
    } else {
        SandboxStatus::Stopped
    }
}

fn running_handle(session: &SandboxSession, container_ref: String) -> SandboxHandle {
    SandboxHandle {
        container_ref,
        container_name: session.container_name.clone(),
        status: SandboxStatus::Running,
    }
}

#[cfg(unix)]
async fn directory_owner(path: &Path) -> Option<String> {
    use std::os::unix::fs::MetadataExt;

    tokio::fs::metadata(path)
        .await
        .ok()
        .map(|meta| format!("{}:{}", meta.uid(), meta.gid()))
}

#[cfg(not(unix))]
async fn directory_owner(_path: &Path) -> Option<String> {
    None
}
