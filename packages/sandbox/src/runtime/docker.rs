// ABOUTME: Docker implementation of the sandbox runtime
// ABOUTME: Uses bollard to create, start, stop, remove and exec into owner sandbox containers

use super::{
    ContainerInfo, ContainerState, ExecOutput, ExecSpec, Result, RuntimeError, SandboxRuntime,
    SandboxSpec,
};
use async_trait::async_trait;
use bollard::{
    container::{
        Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
        StopContainerOptions,
    },
    errors::Error as BollardError,
    exec::{CreateExecOptions, StartExecResults},
    image::CreateImageOptions,
    models::{HostConfig, RestartPolicy, RestartPolicyNameEnum},
    Docker,
};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Exec output beyond this size is dropped
const MAX_EXEC_OUTPUT_BYTES: usize = 4 * 1024 * 1024;

pub struct DockerRuntime {
    client: Docker,
    label_prefix: String,
    /// Timeout for image pull operations
    pull_timeout: Duration,
}

impl DockerRuntime {
    /// Connect to the local daemon using DOCKER_HOST or the platform default socket
    pub fn connect() -> Result<Self> {
        let client = Docker::connect_with_defaults()
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))?;

        Ok(Self::with_client(client))
    }

    pub fn with_client(client: Docker) -> Self {
        Self {
            client,
            label_prefix: "codenest.sandbox".to_string(),
            pull_timeout: Duration::from_secs(600),
        }
    }

    /// Convert a sandbox spec to bollard's container config
    pub fn container_config(spec: &SandboxSpec, label_prefix: &str) -> Config<String> {
        let mut labels = spec.labels.clone();
        labels.insert(format!("{}.managed", label_prefix), "true".to_string());
        labels.insert(format!("{}.name", label_prefix), spec.name.clone());

        let binds: Vec<String> = spec
            .mounts
            .iter()
            .map(|m| {
                format!(
                    "{}:{}:{}",
                    m.host_path,
                    m.container_path,
                    if m.readonly { "ro" } else { "rw" }
                )
            })
            .collect();

        let limits = &spec.limits;
        let host_config = HostConfig {
            binds: Some(binds),
            memory: Some(limits.memory_bytes),
            memory_swap: Some(limits.memory_swap_bytes),
            cpu_quota: Some(limits.cpu_quota_us),
            cpu_period: Some(limits.cpu_period_us),
            cpu_shares: Some(limits.cpu_shares),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            privileged: Some(false),
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::NO),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            working_dir: Some(spec.working_dir.clone()),
            user: spec.user.clone(),
            labels: Some(labels),
            tty: Some(true),
            open_stdin: Some(true),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        match self.client.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(BollardError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(e) => Err(map_error(image, e)),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<()> {
        info!("Pulling image: {} (timeout: {:?})", image, self.pull_timeout);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.client.create_image(Some(options), None, None);

        let pulled = tokio::time::timeout(self.pull_timeout, async {
            while let Some(result) = stream.next().await {
                match result {
                    Ok(info) => {
                        if let Some(error) = info.error {
                            return Err(image_error(image, error));
                        }
                        if let Some(status) = info.status {
                            debug!("Pull status: {}", status);
                        }
                    }
                    Err(e) => return Err(image_error(image, e.to_string())),
                }
            }
            Ok(())
        })
        .await;

        match pulled {
            Ok(result) => result,
            Err(_) => Err(image_error(
                image,
                format!("pull timed out after {:?}", self.pull_timeout),
            )),
        }
    }
}

fn image_error(image: &str, message: impl std::fmt::Display) -> RuntimeError {
    RuntimeError::Failed {
        status: 404,
        message: format!("image {} is not available: {}", image, message),
    }
}

/// Translate daemon responses into runtime errors. 404 and 409 carry meaning
/// for the manager; anything that is not an HTTP response is a transport problem.
fn map_error(subject: &str, error: BollardError) -> RuntimeError {
    match error {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::NotFound(subject.to_string()),
        BollardError::DockerResponseServerError {
            status_code: 409,
            message,
        } => RuntimeError::Conflict(message),
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => RuntimeError::Failed {
            status: status_code,
            message,
        },
        other => RuntimeError::Unavailable(other.to_string()),
    }
}

fn is_not_modified(error: &BollardError) -> bool {
    matches!(
        error,
        BollardError::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.client
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| RuntimeError::Unavailable(e.to_string()))
    }

    async fn inspect(&self, id_or_name: &str) -> Result<ContainerInfo> {
        let inspect = self
            .client
            .inspect_container(id_or_name, None)
            .await
            .map_err(|e| map_error(id_or_name, e))?;

        let state = inspect
            .state
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .map(|s| ContainerState::from_docker(s.as_ref()))
            .unwrap_or_else(|| ContainerState::Unknown("unknown".to_string()));

        Ok(ContainerInfo {
            id: inspect.id.unwrap_or_else(|| id_or_name.to_string()),
            name: inspect
                .name
                .unwrap_or_else(|| id_or_name.to_string())
                .trim_start_matches('/')
                .to_string(),
            state,
            labels: inspect
                .config
                .and_then(|c| c.labels)
                .unwrap_or_default(),
        })
    }

    async fn create_container(&self, spec: &SandboxSpec) -> Result<String> {
        info!("Creating container: {}", spec.name);

        if !self.image_exists(&spec.image).await? {
            self.pull_image(&spec.image).await?;
        }

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            platform: None,
        };
        let config = Self::container_config(spec, &self.label_prefix);

        let container = self
            .client
            .create_container(Some(options), config)
            .await
            .map_err(|e| match e {
                BollardError::DockerResponseServerError {
                    status_code: 404,
                    message,
                } => image_error(&spec.image, message),
                other => map_error(&spec.name, other),
            })?;

        for warning in &container.warnings {
            warn!("Docker warning for {}: {}", spec.name, warning);
        }
        debug!("Created container: {}", container.id);

        if let Err(e) = self.start_container(&container.id).await {
            warn!(
                "Container {} failed to start, removing it: {}",
                spec.name, e
            );
            if let Err(remove_err) = self.remove_container(&container.id, true).await {
                warn!("Failed to remove container {}: {}", spec.name, remove_err);
            }
            return Err(e);
        }

        Ok(container.id)
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        debug!("Starting container: {}", id);

        match self
            .client
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(map_error(id, e)),
        }
    }

    async fn stop_container(&self, id: &str, grace_secs: u64) -> Result<()> {
        debug!("Stopping container: {} (timeout: {}s)", id, grace_secs);

        let options = StopContainerOptions {
            t: grace_secs as i64,
        };

        match self.client.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => Ok(()),
            Err(e) => Err(map_error(id, e)),
        }
    }

    async fn remove_container(&self, id_or_name: &str, force: bool) -> Result<()> {
        debug!("Removing container: {} (force: {})", id_or_name, force);

        let options = RemoveContainerOptions {
            force,
            v: true,
            ..Default::default()
        };

        self.client
            .remove_container(id_or_name, Some(options))
            .await
            .map_err(|e| map_error(id_or_name, e))
    }

    async fn exec(&self, id: &str, spec: &ExecSpec) -> Result<ExecOutput> {
        debug!("Executing in container {}: {:?}", id, spec.command);

        let exec_config = CreateExecOptions {
            cmd: Some(spec.command.clone()),
            working_dir: spec.working_dir.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(false),
            ..Default::default()
        };

        let exec = self
            .client
            .create_exec(id, exec_config)
            .await
            .map_err(|e| map_error(id, e))?;

        let started = self
            .client
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| map_error(id, e))?;

        let mut output = Vec::new();
        let mut truncated = false;

        match started {
            StartExecResults::Attached { output: mut stream, .. } => {
                while let Some(msg) = stream.next().await {
                    let chunk = match msg.map_err(|e| map_error(id, e))? {
                        LogOutput::StdOut { message }
                        | LogOutput::StdErr { message }
                        | LogOutput::Console { message } => message,
                        LogOutput::StdIn { .. } => continue,
                    };
                    let room = MAX_EXEC_OUTPUT_BYTES.saturating_sub(output.len());
                    if chunk.len() > room {
                        truncated = true;
                    }
                    output.extend_from_slice(&chunk[..chunk.len().min(room)]);
                }
            }
            StartExecResults::Detached => {
                return Err(RuntimeError::Failed {
                    status: 500,
                    message: "exec was detached unexpectedly".to_string(),
                })
            }
        }

        if truncated {
            warn!(
                "Exec output in container {} exceeded {} bytes and was truncated",
                id, MAX_EXEC_OUTPUT_BYTES
            );
        }

        let inspect = self
            .client
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| map_error(id, e))?;

        let exit_code = match inspect.exit_code {
            Some(code) => code,
            None => {
                warn!("Daemon reported no exit code for exec in {}", id);
                -1
            }
        };

        Ok(ExecOutput { exit_code, output })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ResourceProfile;
    use crate::runtime::BindMount;
    use std::collections::HashMap;

    fn spec() -> SandboxSpec {
        SandboxSpec {
            image: "terminal_session".to_string(),
            name: "codenest-alice_2f_42".to_string(),
            labels: HashMap::from([("codenest.owner".to_string(), "alice/42".to_string())]),
            mounts: vec![
                BindMount {
                    host_path: "/srv/workspaces/alice/42".to_string(),
                    container_path: "/workspace".to_string(),
                    readonly: false,
                },
                BindMount {
                    host_path: "/srv/volumes/alice_2f_42_volume".to_string(),
                    container_path: "/mnt/volume".to_string(),
                    readonly: false,
                },
            ],
            working_dir: "/workspace".to_string(),
            command: vec!["/bin/bash".to_string(), "-l".to_string()],
            user: Some("1000:1000".to_string()),
            limits: ResourceProfile {
                memory_limit: "256m".to_string(),
                memory_swap_limit: "256m".to_string(),
                cpu_quota: 0.5,
                cpu_priority_weight: 512,
            }
            .limits()
            .unwrap(),
        }
    }

    #[test]
    fn test_container_config_conversion() {
        let config = DockerRuntime::container_config(&spec(), "codenest.sandbox");

        assert_eq!(config.image.as_deref(), Some("terminal_session"));
        assert_eq!(config.user.as_deref(), Some("1000:1000"));
        assert_eq!(config.working_dir.as_deref(), Some("/workspace"));
        assert_eq!(config.tty, Some(true));
        assert_eq!(config.open_stdin, Some(true));

        let labels = config.labels.unwrap();
        assert_eq!(labels.get("codenest.sandbox.managed").map(String::as_str), Some("true"));
        assert_eq!(labels.get("codenest.owner").map(String::as_str), Some("alice/42"));

        let host = config.host_config.unwrap();
        assert_eq!(host.memory, Some(256 * 1024 * 1024));
        assert_eq!(host.memory_swap, Some(256 * 1024 * 1024));
        assert_eq!(host.cpu_quota, Some(50_000));
        assert_eq!(host.cpu_period, Some(100_000));
        assert_eq!(host.cpu_shares, Some(512));
        assert_eq!(host.privileged, Some(false));
        assert_eq!(host.security_opt, Some(vec!["no-new-privileges".to_string()]));
        assert_eq!(
            host.binds,
            Some(vec![
                "/srv/workspaces/alice/42:/workspace:rw".to_string(),
                "/srv/volumes/alice_2f_42_volume:/mnt/volume:rw".to_string(),
            ])
        );
    }

    #[test]
    fn test_error_mapping() {
        let not_found = BollardError::DockerResponseServerError {
            status_code: 404,
            message: "No such container".to_string(),
        };
        assert_eq!(
            map_error("abc", not_found),
            RuntimeError::NotFound("abc".to_string())
        );

        let conflict = BollardError::DockerResponseServerError {
            status_code: 409,
            message: "name in use".to_string(),
        };
        assert_eq!(
            map_error("abc", conflict),
            RuntimeError::Conflict("name in use".to_string())
        );

        let server = BollardError::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_string(),
        };
        assert!(matches!(
            map_error("abc", server),
            RuntimeError::Failed { status: 500, .. }
        ));

        assert!(is_not_modified(&BollardError::DockerResponseServerError {
            status_code: 304,
            message: String::new(),
        }));
    }

    #[tokio::test]
    #[ignore] // Requires Docker daemon
    async fn test_ping_local_daemon() {
        let runtime = DockerRuntime::connect().unwrap();
        runtime.ping().await.unwrap();
    }

    #[tokio::test]
    #[ignore] // Requires Docker daemon
    async fn test_inspect_missing_container() {
        let runtime = DockerRuntime::connect().unwrap();
        let result = runtime.inspect("codenest-definitely-missing").await;
        assert!(matches!(result, Err(RuntimeError::NotFound(_))));
    }
}
