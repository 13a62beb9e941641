// ABOUTME: Codenest server and CLI support library
// ABOUTME: Logging setup, session manager construction, server bootstrap and one-shot commands

use anyhow::{Context, Result};
use codenest_sandbox::{DockerRuntime, ManagerSettings, SessionManager, SessionStorage};
use std::sync::Arc;

pub mod commands;
pub mod config;
pub mod server;

#[cfg(test)]
mod tests;

use config::Config;

/// Install the tracing subscriber. `RUST_LOG` overrides the `info` default.
/// Logs go to stderr so command output on stdout stays clean.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

/// Session manager over the configured database and the local Docker daemon
pub async fn build_manager(config: &Config) -> Result<SessionManager> {
    let storage = SessionStorage::connect(&config.database_url)
        .await
        .with_context(|| format!("opening session database {}", config.database_url))?;
    let runtime = DockerRuntime::connect().context("connecting to Docker")?;

    Ok(SessionManager::new(
        Arc::new(storage),
        Arc::new(runtime),
        ManagerSettings::from_env(),
    ))
}
