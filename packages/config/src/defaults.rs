// ABOUTME: Default values applied when an environment variable is unset or invalid
// ABOUTME: Shared by the sandbox manager, the API server and the CLI

pub const DEFAULT_API_PORT: u16 = 4101;
pub const DEFAULT_API_HOST: &str = "127.0.0.1";
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

pub const DEFAULT_DATABASE_URL: &str = "sqlite://codenest.db";
pub const DEFAULT_WORKSPACE_ROOT: &str = "workspaces";
pub const DEFAULT_VOLUME_ROOT: &str = "volumes";

pub const DEFAULT_SANDBOX_IMAGE: &str = "terminal_session";
pub const DEFAULT_CONTAINER_PREFIX: &str = "codenest";
pub const DEFAULT_SHELL: &str = "/bin/bash";

pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 3600;
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_STOP_GRACE_SECS: u64 = 10;

pub const DEFAULT_MEMORY_LIMIT: &str = "512m";
pub const DEFAULT_MEMORY_SWAP_LIMIT: &str = "1g";
pub const DEFAULT_CPUS: f64 = 1.0;
pub const DEFAULT_CPU_SHARES: i64 = 1024;
