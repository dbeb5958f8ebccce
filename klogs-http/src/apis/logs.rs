use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::{IntoResponse, Response},
};
use tracing::info;
use uuid::Uuid;

use crate::{ws, ErrorResponse, ServerState};

/// GET /websocket - Stream pod logs over a WebSocket.
/// The first text frame carries the subscription request; log lines follow
/// until the session closes.
pub async fn handle_log_websocket(
    State(state): State<ServerState>,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ErrorResponse> {
    let request_id = Uuid::new_v4();
    info!("[{}] GET /websocket", request_id);

    // Admit before upgrading so a full server answers with a plain HTTP error
    let guard = state
        .session_manager
        .admit(&request_id.to_string())
        .await?;

    let manager = state.session_manager.clone();
    Ok(upgrade
        .on_upgrade(move |socket| async move {
            let (sink, inbound) = ws::split(socket);
            manager.serve(guard, sink, inbound).await;
        })
        .into_response())
}
