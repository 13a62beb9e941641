// ABOUTME: HTTP API layer for Codenest providing REST and websocket endpoints
// ABOUTME: Routes per-owner sandbox session operations onto the command gateway

use axum::{
    routing::{get, post},
    Router,
};
use codenest_sandbox::CommandGateway;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub mod handlers;
pub mod owners;
pub mod response;
pub mod terminal;

pub use owners::OwnerDirectory;
pub use response::{ApiError, ApiResponse};

#[derive(Clone)]
pub struct AppState {
    pub gateway: CommandGateway,
    pub owners: Arc<OwnerDirectory>,
}

impl AppState {
    pub fn new(gateway: CommandGateway, owners: OwnerDirectory) -> Self {
        Self {
            gateway,
            owners: Arc::new(owners),
        }
    }
}

/// Creates the sandbox session router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health_check))
        .route("/api/sessions", get(handlers::list_sessions))
        .route(
            "/api/sessions/{user}/{project}",
            get(handlers::get_status).delete(handlers::delete_session),
        )
        .route(
            "/api/sessions/{user}/{project}/start",
            post(handlers::start_session),
        )
        .route(
            "/api/sessions/{user}/{project}/stop",
            post(handlers::stop_session),
        )
        .route(
            "/api/sessions/{user}/{project}/exec",
            post(handlers::exec_command),
        )
        .route(
            "/ws/{user}/{project}/terminal",
            get(terminal::terminal_socket),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
