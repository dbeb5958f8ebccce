use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::session::SessionInfo;
use crate::{ErrorResponse, ServerState};

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionList {
    pub count: usize,
    pub sessions: Vec<SessionInfo>,
}

/// GET /v1/sessions - List live log sessions
pub async fn handle_list_sessions(State(state): State<ServerState>) -> Json<SessionList> {
    let sessions = state.session_manager.list_sessions().await;
    Json(SessionList {
        count: sessions.len(),
        sessions,
    })
}

/// DELETE /v1/sessions/{session_id} - Cancel a live log session
pub async fn handle_cancel_session(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
) -> Result<Response, ErrorResponse> {
    let request_id = Uuid::new_v4();
    info!("[{}] DELETE /v1/sessions/{}", request_id, session_id);

    if !state
        .session_manager
        .cancel_session(&request_id.to_string(), &session_id)
        .await
    {
        return Err(ErrorResponse::not_found(format!(
            "Session not found: {}",
            session_id
        )));
    }

    Ok(Json(serde_json::json!({
        "session_id": session_id,
        "status": "cancelled"
    }))
    .into_response())
}

/// GET /healthz
pub async fn handle_health() -> &'static str {
    "ok"
}
