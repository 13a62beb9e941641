// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Codenest

// API Server Configuration
pub const CODENEST_API_PORT: &str = "CODENEST_API_PORT";
pub const CODENEST_API_HOST: &str = "CODENEST_API_HOST";
pub const CODENEST_CORS_ORIGIN: &str = "CODENEST_CORS_ORIGIN";

// Storage
pub const CODENEST_DATABASE_URL: &str = "CODENEST_DATABASE_URL";
pub const CODENEST_WORKSPACE_ROOT: &str = "CODENEST_WORKSPACE_ROOT";
pub const CODENEST_VOLUME_ROOT: &str = "CODENEST_VOLUME_ROOT";

// Sandbox Container Configuration
pub const CODENEST_SANDBOX_IMAGE: &str = "CODENEST_SANDBOX_IMAGE";
pub const CODENEST_CONTAINER_PREFIX: &str = "CODENEST_CONTAINER_PREFIX";
pub const CODENEST_SHELL: &str = "CODENEST_SHELL";
pub const CODENEST_SANDBOX_USER: &str = "CODENEST_SANDBOX_USER";

// Sandbox Lifecycle Timing
pub const CODENEST_IDLE_TIMEOUT_SECS: &str = "CODENEST_IDLE_TIMEOUT_SECS";
pub const CODENEST_EXEC_TIMEOUT_SECS: &str = "CODENEST_EXEC_TIMEOUT_SECS";
pub const CODENEST_STOP_GRACE_SECS: &str = "CODENEST_STOP_GRACE_SECS";

// Default Resource Profile
pub const CODENEST_DEFAULT_MEMORY_LIMIT: &str = "CODENEST_DEFAULT_MEMORY_LIMIT";
pub const CODENEST_DEFAULT_MEMORY_SWAP_LIMIT: &str = "CODENEST_DEFAULT_MEMORY_SWAP_LIMIT";
pub const CODENEST_DEFAULT_CPUS: &str = "CODENEST_DEFAULT_CPUS";
pub const CODENEST_DEFAULT_CPU_SHARES: &str = "CODENEST_DEFAULT_CPU_SHARES";
