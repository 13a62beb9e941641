// ABOUTME: Owner identity and resource profile types consumed by the session manager
// ABOUTME: Parses Docker-style memory sizes and resolves profiles into concrete container limits

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// CFS scheduling period used for CPU quotas, in microseconds.
pub const CPU_PERIOD_US: i64 = 100_000;

/// Docker refuses memory limits below 6 MiB.
const MIN_MEMORY_BYTES: i64 = 6 * 1024 * 1024;
const MIN_CPU_QUOTA_US: i64 = 1_000;
const MAX_CPU_SHARES: i64 = 262_144;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProfileError {
    #[error("Invalid memory size '{0}'")]
    InvalidMemory(String),
    #[error("Memory limit {0} is below the 6m minimum")]
    MemoryTooSmall(String),
    #[error("Memory swap limit {swap} is below memory limit {memory}")]
    SwapBelowMemory { memory: String, swap: String },
    #[error("Invalid CPU quota {0}, expected a positive number of CPUs of at least 0.01")]
    InvalidCpuQuota(f64),
    #[error("Invalid CPU priority weight {0}, expected 2-262144")]
    InvalidCpuWeight(i64),
}

/// Unique key of a sandbox owner: a user, or a user's project.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn user(user: impl Into<String>) -> Self {
        Self(user.into())
    }

    pub fn project(user: &str, project: &str) -> Self {
        Self(format!("{}/{}", user, project))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name-safe rendering of the id.
    ///
    /// `[A-Za-z0-9.-]` pass through, `_` is doubled and anything else is
    /// written as `_{hex}_`, so two different owners never share a slug.
    pub fn slug(&self) -> String {
        let mut slug = String::with_capacity(self.0.len());
        for c in self.0.chars() {
            match c {
                c if c.is_ascii_alphanumeric() || c == '.' || c == '-' => slug.push(c),
                '_' => slug.push_str("__"),
                other => slug.push_str(&format!("_{:x}_", other as u32)),
            }
        }
        slug
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for OwnerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for OwnerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Resource limits requested for an owner's sandbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceProfile {
    /// Memory limit such as `512m` or `2g`
    pub memory_limit: String,
    /// Memory plus swap limit, `-1` for unlimited swap
    pub memory_swap_limit: String,
    /// Number of CPUs, may be fractional
    pub cpu_quota: f64,
    /// Relative CPU weight (Docker CPU shares)
    pub cpu_priority_weight: i64,
}

impl Default for ResourceProfile {
    fn default() -> Self {
        use codenest_config::defaults::*;

        Self {
            memory_limit: DEFAULT_MEMORY_LIMIT.to_string(),
            memory_swap_limit: DEFAULT_MEMORY_SWAP_LIMIT.to_string(),
            cpu_quota: DEFAULT_CPUS,
            cpu_priority_weight: DEFAULT_CPU_SHARES,
        }
    }
}

/// Concrete values handed to the container runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimits {
    pub memory_bytes: i64,
    /// `-1` disables the swap limit
    pub memory_swap_bytes: i64,
    pub cpu_quota_us: i64,
    pub cpu_period_us: i64,
    pub cpu_shares: i64,
}

impl ResourceProfile {
    /// Validate the profile and resolve it into runtime limits.
    pub fn limits(&self) -> Result<ResourceLimits, ProfileError> {
        let memory_bytes = parse_memory_size(&self.memory_limit)?;
        if memory_bytes < MIN_MEMORY_BYTES {
            return Err(ProfileError::MemoryTooSmall(self.memory_limit.clone()));
        }

        let memory_swap_bytes = if self.memory_swap_limit.trim() == "-1" {
            -1
        } else {
            let swap = parse_memory_size(&self.memory_swap_limit)?;
            if swap < memory_bytes {
                return Err(ProfileError::SwapBelowMemory {
                    memory: self.memory_limit.clone(),
                    swap: self.memory_swap_limit.clone(),
                });
            }
            swap
        };

        if !self.cpu_quota.is_finite() || self.cpu_quota <= 0.0 {
            return Err(ProfileError::InvalidCpuQuota(self.cpu_quota));
        }
        let cpu_quota_us = (self.cpu_quota * CPU_PERIOD_US as f64).round() as i64;
        if cpu_quota_us < MIN_CPU_QUOTA_US {
            return Err(ProfileError::InvalidCpuQuota(self.cpu_quota));
        }

        if !(2..=MAX_CPU_SHARES).contains(&self.cpu_priority_weight) {
            return Err(ProfileError::InvalidCpuWeight(self.cpu_priority_weight));
        }

        Ok(ResourceLimits {
            memory_bytes,
            memory_swap_bytes,
            cpu_quota_us,
            cpu_period_us: CPU_PERIOD_US,
            cpu_shares: self.cpu_priority_weight,
        })
    }
}

/// Parse a Docker-style size (`1073741824`, `512m`, `512mb`, `1.5g`) into bytes.
pub fn parse_memory_size(input: &str) -> Result<i64, ProfileError> {
    let invalid = || ProfileError::InvalidMemory(input.to_string());

    let normalized = input.trim().to_ascii_lowercase();
    let mut digits = normalized.as_str();

    // "mb" and friends: drop the trailing b after a unit letter
    if digits.len() > 2 && digits.ends_with('b') {
        let unit = digits.as_bytes()[digits.len() - 2];
        if matches!(unit, b'k' | b'm' | b'g') {
            digits = &digits[..digits.len() - 1];
        }
    }

    let (number, multiplier) = match digits.chars().last() {
        Some('b') => (&digits[..digits.len() - 1], 1u64),
        Some('k') => (&digits[..digits.len() - 1], 1u64 << 10),
        Some('m') => (&digits[..digits.len() - 1], 1u64 << 20),
        Some('g') => (&digits[..digits.len() - 1], 1u64 << 30),
        Some(c) if c.is_ascii_digit() => (digits, 1u64),
        _ => return Err(invalid()),
    };

    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(invalid());
    }

    let value: f64 = number.parse().map_err(|_| invalid())?;
    let bytes = (value * multiplier as f64).floor();
    if !bytes.is_finite() || bytes < 1.0 || bytes > i64::MAX as f64 {
        return Err(invalid());
    }

    Ok(bytes as i64)
}

/// Everything the manager needs to provision a sandbox for one owner.
#[derive(Debug, Clone)]
pub struct Owner {
    pub id: OwnerId,
    /// Host directory bind-mounted as the sandbox workspace
    pub workspace_path: PathBuf,
    pub resource_profile: ResourceProfile,
}

impl Owner {
    pub fn new(id: OwnerId, workspace_path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            workspace_path: workspace_path.into(),
            resource_profile: ResourceProfile::default(),
        }
    }

    pub fn with_profile(mut self, profile: ResourceProfile) -> Self {
        self.resource_profile = profile;
        self
    }
}
