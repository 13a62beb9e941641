// ABOUTME: Websocket terminal for interactive command execution in an owner's sandbox
// ABOUTME: Each text frame carries one command; frames on a socket are answered in order

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
};
use codenest_sandbox::{CommandGateway, Owner, TerminalMessage};
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct TerminalRequest {
    pub command: String,
    #[serde(default)]
    pub working_directory: Option<String>,
}

pub async fn terminal_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((user, project)): Path<(String, String)>,
) -> Response {
    let owner = match state.owners.resolve(&user, &project).await {
        Ok(owner) => owner,
        Err(e) => return e.into_response(),
    };

    info!(owner = %owner.id, "Terminal connected");
    ws.on_upgrade(move |socket| handle_socket(socket, state.gateway, owner))
}

async fn handle_socket(mut socket: WebSocket, gateway: CommandGateway, owner: Owner) {
    while let Some(frame) = socket.recv().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(owner = %owner.id, "Terminal socket error: {}", e);
                break;
            }
        };

        let Some(reply) = handle_frame(&gateway, &owner, text.as_str()).await else {
            continue;
        };

        let payload = match serde_json::to_string(&reply) {
            Ok(payload) => payload,
            Err(e) => {
                error!(owner = %owner.id, "Failed to encode terminal reply: {}", e);
                continue;
            }
        };
        if socket.send(Message::Text(payload.into())).await.is_err() {
            break;
        }
    }

    info!(owner = %owner.id, "Terminal disconnected");
}

/// Answer one text frame. Blank commands get no reply.
pub async fn handle_frame(
    gateway: &CommandGateway,
    owner: &Owner,
    text: &str,
) -> Option<TerminalMessage> {
    let request: TerminalRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(e) => {
            return Some(TerminalMessage::TerminalError {
                error: format!("Invalid message: {}", e),
            })
        }
    };

    let command = request.command.trim();
    if command.is_empty() {
        return None;
    }

    let response = gateway
        .run(owner.clone(), command.to_string(), request.working_directory)
        .await;
    Some(response.into())
}
