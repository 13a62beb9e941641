// ABOUTME: Server configuration loaded from the environment
// ABOUTME: Listen address, CORS origin, database location and workspace root with validation

use codenest_config::constants::*;
use codenest_config::defaults::*;
use codenest_config::env_string_or;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::num::ParseIntError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid port number: {0}")]
    InvalidPort(#[from] ParseIntError),
    #[error("Port {0} is out of valid range (1-65535)")]
    PortOutOfRange(u16),
    #[error("Invalid host address: {0}")]
    InvalidHost(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub cors_origin: String,
    pub database_url: String,
    pub workspace_root: PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let port_str =
            env::var(CODENEST_API_PORT).unwrap_or_else(|_| DEFAULT_API_PORT.to_string());
        let port = port_str.trim().parse::<u16>()?;

        if port == 0 {
            return Err(ConfigError::PortOutOfRange(port));
        }

        let host_str =
            env::var(CODENEST_API_HOST).unwrap_or_else(|_| DEFAULT_API_HOST.to_string());
        let host = host_str
            .trim()
            .parse::<IpAddr>()
            .map_err(|_| ConfigError::InvalidHost(host_str.clone()))?;

        Ok(Config {
            host,
            port,
            cors_origin: env_string_or(CODENEST_CORS_ORIGIN, DEFAULT_CORS_ORIGIN),
            database_url: env_string_or(CODENEST_DATABASE_URL, DEFAULT_DATABASE_URL),
            workspace_root: PathBuf::from(env_string_or(
                CODENEST_WORKSPACE_ROOT,
                DEFAULT_WORKSPACE_ROOT,
            )),
        })
    }

    /// Apply command line flags on top of the environment
    pub fn with_overrides(
        mut self,
        host: Option<IpAddr>,
        port: Option<u16>,
    ) -> Result<Self, ConfigError> {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            if port == 0 {
                return Err(ConfigError::PortOutOfRange(port));
            }
            self.port = port;
        }
        Ok(self)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
