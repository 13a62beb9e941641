// ABOUTME: HTTP request handlers for sandbox session operations
// ABOUTME: Health, listing, status, start, stop, command execution and deletion per owner

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::response::{ok_or_api_error, ApiError};
use crate::AppState;

/// Health check including whether the container runtime answers
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let runtime = match state.gateway.manager().runtime().ping().await {
        Ok(()) => "available",
        Err(_) => "unavailable",
    };

    Json(json!({
        "status": "healthy",
        "service": "codenest",
        "version": env!("CARGO_PKG_VERSION"),
        "runtime": runtime,
    }))
}

/// List all session records
pub async fn list_sessions(State(state): State<AppState>) -> Response {
    info!("Listing sandbox sessions");

    let result = state
        .gateway
        .manager()
        .list_sessions()
        .await
        .map_err(ApiError::from);
    ok_or_api_error(result, "Failed to list sessions")
}

/// Session status for a user's project
pub async fn get_status(
    State(state): State<AppState>,
    Path((user, project)): Path<(String, String)>,
) -> Response {
    let result = async {
        let owner_id = state.owners.owner_id(&user, &project)?;
        Ok::<_, ApiError>(state.gateway.manager().status(&owner_id).await?)
    }
    .await;
    ok_or_api_error(result, "Failed to get session status")
}

/// Ensure the sandbox is running
pub async fn start_session(
    State(state): State<AppState>,
    Path((user, project)): Path<(String, String)>,
) -> Response {
    info!("Starting sandbox for {}/{}", user, project);

    let result = async {
        let owner = state.owners.resolve(&user, &project).await?;
        Ok::<_, ApiError>(state.gateway.manager().ensure_running(&owner).await?)
    }
    .await;
    ok_or_api_error(result, "Failed to start sandbox")
}

pub async fn stop_session(
    State(state): State<AppState>,
    Path((user, project)): Path<(String, String)>,
) -> Response {
    info!("Stopping sandbox for {}/{}", user, project);

    let result = async {
        let owner_id = state.owners.owner_id(&user, &project)?;
        let stopped = state.gateway.manager().stop(&owner_id).await?;
        Ok::<_, ApiError>(json!({ "stopped": stopped }))
    }
    .await;
    ok_or_api_error(result, "Failed to stop sandbox")
}

/// Request body for command execution
#[derive(Deserialize)]
pub struct ExecRequest {
    pub command: String,
    #[serde(default)]
    pub working_directory: Option<String>,
}

/// Run a command in the owner's sandbox.
///
/// Command-level failures come back as a `CommandResponse` with
/// `success: false`; only request problems map to error statuses.
pub async fn exec_command(
    State(state): State<AppState>,
    Path((user, project)): Path<(String, String)>,
    Json(request): Json<ExecRequest>,
) -> Response {
    let command = request.command.trim();
    if command.is_empty() {
        return ApiError::BadRequest("command must not be empty".to_string()).into_response();
    }

    let owner = match state.owners.resolve(&user, &project).await {
        Ok(owner) => owner,
        Err(e) => return e.into_response(),
    };

    info!(owner = %owner.id, "Executing command");
    let response = state
        .gateway
        .run(owner, command.to_string(), request.working_directory)
        .await;

    (StatusCode::OK, Json(response)).into_response()
}

/// Remove the sandbox. The workspace directory is kept.
pub async fn delete_session(
    State(state): State<AppState>,
    Path((user, project)): Path<(String, String)>,
) -> Response {
    info!("Deleting sandbox for {}/{}", user, project);

    let result = async {
        let owner_id = state.owners.owner_id(&user, &project)?;
        state.gateway.manager().delete(&owner_id).await?;
        Ok::<_, ApiError>(json!({ "message": "Sandbox deleted successfully" }))
    }
    .await;
    ok_or_api_error(result, "Failed to delete sandbox")
}
