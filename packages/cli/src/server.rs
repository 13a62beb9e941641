// ABOUTME: API server bootstrap for the codenest binary
// ABOUTME: Recovers sessions, serves the router with CORS and stops idle timers on shutdown

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use codenest_api::{create_router, AppState, OwnerDirectory};
use codenest_sandbox::{default_resource_profile, CommandGateway};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::build_manager;
use crate::config::Config;

pub fn cors_layer(origin: &str) -> Result<CorsLayer> {
    let origin = origin
        .parse::<HeaderValue>()
        .with_context(|| format!("invalid CORS origin {}", origin))?;

    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any))
}

pub async fn run_server(config: Config) -> Result<()> {
    let manager = build_manager(&config).await?;

    if let Err(e) = manager.runtime().ping().await {
        warn!("Docker is not reachable, sandbox operations will fail until it is: {}", e);
    }
    if let Err(e) = manager.recover().await {
        warn!("Failed to recover sandbox sessions: {}", e);
    }

    let owners = OwnerDirectory::new(config.workspace_root.clone(), default_resource_profile());
    let state = AppState::new(CommandGateway::new(manager.clone()), owners);
    let app = create_router(state).layer(cors_layer(&config.cors_origin)?);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    info!("Server listening on {}", addr);
    info!("CORS origin: {}", config.cors_origin);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    manager.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
