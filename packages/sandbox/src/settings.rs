// ABOUTME: Session manager settings loaded from the environment
// ABOUTME: Container image, naming, mounts, shell and lifecycle timeouts with validated defaults

use crate::profile::{OwnerId, ResourceProfile};
use codenest_config::constants::*;
use codenest_config::defaults::*;
use codenest_config::{env_parse_or, env_string, env_string_or};
use std::path::PathBuf;
use std::time::Duration;

/// Mount point of the owner's workspace inside the sandbox
pub const WORKSPACE_MOUNT: &str = "/workspace";
/// Mount point of the owner's secondary volume inside the sandbox
pub const VOLUME_MOUNT: &str = "/mnt/volume";

const MIN_IDLE_TIMEOUT_SECS: u64 = 2;
const MAX_IDLE_TIMEOUT_SECS: u64 = 7 * 24 * 3600;
const MAX_EXEC_TIMEOUT_SECS: u64 = 24 * 3600;
const MAX_STOP_GRACE_SECS: u64 = 300;

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub image: String,
    pub container_prefix: String,
    /// Host directory holding per-owner secondary volumes
    pub volume_root: PathBuf,
    pub shell: String,
    /// Explicit `uid:gid` for sandbox processes. When unset the owner of the
    /// workspace directory is used.
    pub sandbox_user: Option<String>,
    pub idle_timeout: Duration,
    pub exec_timeout: Duration,
    pub stop_grace: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            image: DEFAULT_SANDBOX_IMAGE.to_string(),
            container_prefix: DEFAULT_CONTAINER_PREFIX.to_string(),
            volume_root: PathBuf::from(DEFAULT_VOLUME_ROOT),
            shell: DEFAULT_SHELL.to_string(),
            sandbox_user: None,
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            exec_timeout: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
            stop_grace: Duration::from_secs(DEFAULT_STOP_GRACE_SECS),
        }
    }
}

impl ManagerSettings {
    pub fn from_env() -> Self {
        let idle_secs = env_parse_or(CODENEST_IDLE_TIMEOUT_SECS, DEFAULT_IDLE_TIMEOUT_SECS, |v| {
            (MIN_IDLE_TIMEOUT_SECS..=MAX_IDLE_TIMEOUT_SECS).contains(v)
        });
        // A command must finish inside the idle window it started in
        let exec_ceiling = (idle_secs - 1).min(MAX_EXEC_TIMEOUT_SECS);
        let exec_secs = env_parse_or(
            CODENEST_EXEC_TIMEOUT_SECS,
            DEFAULT_EXEC_TIMEOUT_SECS.min(exec_ceiling),
            |v| (1..=exec_ceiling).contains(v),
        );
        let grace_secs = env_parse_or(CODENEST_STOP_GRACE_SECS, DEFAULT_STOP_GRACE_SECS, |v| {
            *v <= MAX_STOP_GRACE_SECS
        });

        Self {
            image: env_string_or(CODENEST_SANDBOX_IMAGE, DEFAULT_SANDBOX_IMAGE),
            container_prefix: env_string(CODENEST_CONTAINER_PREFIX)
                .filter(|p| valid_prefix(p))
                .unwrap_or_else(|| DEFAULT_CONTAINER_PREFIX.to_string()),
            volume_root: PathBuf::from(env_string_or(CODENEST_VOLUME_ROOT, DEFAULT_VOLUME_ROOT)),
            shell: env_string_or(CODENEST_SHELL, DEFAULT_SHELL),
            sandbox_user: env_string(CODENEST_SANDBOX_USER),
            idle_timeout: Duration::from_secs(idle_secs),
            exec_timeout: Duration::from_secs(exec_secs),
            stop_grace: Duration::from_secs(grace_secs),
        }
    }

    /// Deterministic container name for an owner
    pub fn container_name(&self, owner_id: &OwnerId) -> String {
        format!("{}-{}", self.container_prefix, owner_id.slug())
    }

    /// Host path of the owner's secondary volume
    pub fn volume_path(&self, owner_id: &OwnerId) -> PathBuf {
        self.volume_root.join(format!("{}_volume", owner_id.slug()))
    }
}

/// Default resource profile for owners without their own
pub fn default_resource_profile() -> ResourceProfile {
    ResourceProfile {
        memory_limit: env_string_or(CODENEST_DEFAULT_MEMORY_LIMIT, DEFAULT_MEMORY_LIMIT),
        memory_swap_limit: env_string_or(
            CODENEST_DEFAULT_MEMORY_SWAP_LIMIT,
            DEFAULT_MEMORY_SWAP_LIMIT,
        ),
        cpu_quota: env_parse_or(CODENEST_DEFAULT_CPUS, DEFAULT_CPUS, |v| {
            v.is_finite() && *v > 0.0
        }),
        cpu_priority_weight: env_parse_or(CODENEST_DEFAULT_CPU_SHARES, DEFAULT_CPU_SHARES, |v| {
            (2..=262_144).contains(v)
        }),
    }
}

// Docker names must start with an alphanumeric character
fn valid_prefix(prefix: &str) -> bool {
    prefix
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphanumeric())
        && prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_container_name_and_volume_path() {
        let settings = ManagerSettings {
            volume_root: PathBuf::from("/srv/volumes"),
            ..Default::default()
        };
        let owner = OwnerId::project("alice", "42");

        assert_eq!(settings.container_name(&owner), "codenest-alice_2f_42");
        assert_eq!(
            settings.volume_path(&owner),
            PathBuf::from("/srv/volumes/alice_2f_42_volume")
        );
    }

    #[test]
    #[serial]
    fn test_from_env_reads_and_validates() {
        env::set_var(CODENEST_IDLE_TIMEOUT_SECS, "120");
        env::set_var(CODENEST_EXEC_TIMEOUT_SECS, "0");
        env::set_var(CODENEST_CONTAINER_PREFIX, "-bad");
        env::set_var(CODENEST_SANDBOX_USER, "1000:1000");

        let settings = ManagerSettings::from_env();
        assert_eq!(settings.idle_timeout, Duration::from_secs(120));
        // The 300s default does not fit a 120s idle window
        assert_eq!(settings.exec_timeout, Duration::from_secs(119));
        assert_eq!(settings.container_prefix, DEFAULT_CONTAINER_PREFIX);
        assert_eq!(settings.sandbox_user.as_deref(), Some("1000:1000"));

        env::remove_var(CODENEST_IDLE_TIMEOUT_SECS);
        env::remove_var(CODENEST_EXEC_TIMEOUT_SECS);
        env::remove_var(CODENEST_CONTAINER_PREFIX);
        env::remove_var(CODENEST_SANDBOX_USER);
    }

    #[test]
    #[serial]
    fn test_exec_timeout_must_be_shorter_than_idle_timeout() {
        env::set_var(CODENEST_IDLE_TIMEOUT_SECS, "60");
        env::set_var(CODENEST_EXEC_TIMEOUT_SECS, "600");
        let settings = ManagerSettings::from_env();
        assert_eq!(settings.idle_timeout, Duration::from_secs(60));
        assert_eq!(settings.exec_timeout, Duration::from_secs(59));

        env::set_var(CODENEST_EXEC_TIMEOUT_SECS, "60");
        assert_eq!(ManagerSettings::from_env().exec_timeout, Duration::from_secs(59));

        env::set_var(CODENEST_EXEC_TIMEOUT_SECS, "30");
        assert_eq!(ManagerSettings::from_env().exec_timeout, Duration::from_secs(30));

        env::set_var(CODENEST_IDLE_TIMEOUT_SECS, "1");
        let settings = ManagerSettings::from_env();
        assert_eq!(
            settings.idle_timeout,
            Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS)
        );
        assert_eq!(settings.exec_timeout, Duration::from_secs(30));

        env::remove_var(CODENEST_IDLE_TIMEOUT_SECS);
        env::remove_var(CODENEST_EXEC_TIMEOUT_SECS);
    }

    #[test]
    fn test_valid_prefix() {
        assert!(valid_prefix("codenest"));
        assert!(valid_prefix("cn.dev-1"));
        assert!(!valid_prefix(""));
        assert!(!valid_prefix("_x"));
        assert!(!valid_prefix("a/b"));
    }
}
