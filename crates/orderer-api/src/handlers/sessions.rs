//! /sessions handlers: session inspection.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use orderer_services::SessionInfo;

use super::ApiState;

#[derive(Serialize)]
pub struct SessionEntry {
    pub id: u64,
    pub peer: String,
    pub uptime_secs: u64,
    pub received: u64,
    pub accepted: u64,
    pub rejected: u64,
}

impl From<&SessionInfo> for SessionEntry {
    fn from(info: &SessionInfo) -> Self {
        Self {
            id: info.id,
            peer: info.peer.clone(),
            uptime_secs: info.established_at.elapsed().as_secs(),
            received: info.received,
            accepted: info.accepted,
            rejected: info.rejected,
        }
    }
}

// ── /sessions ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionEntry>,
}

pub async fn handle_sessions(State(state): State<ApiState>) -> Json<SessionsResponse> {
    let mut sessions: Vec<SessionEntry> = state
        .sessions
        .iter()
        .map(|e| SessionEntry::from(e.value()))
        .collect();
    sessions.sort_by_key(|s| s.id);

    Json(SessionsResponse { sessions })
}

// ── /sessions/:id ─────────────────────────────────────────────────────────────

pub async fn handle_session_inspect(
    State(state): State<ApiState>,
    Path(id): Path<u64>,
) -> Result<Json<SessionEntry>, (StatusCode, String)> {
    let session = state
        .sessions
        .get(&id)
        .ok_or((StatusCode::NOT_FOUND, "session not found".to_string()))?;

    Ok(Json(SessionEntry::from(session.value())))
}
