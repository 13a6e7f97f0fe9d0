//! /status and /daemon/shutdown handlers.

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use orderer_services::CutterStatus;

use super::ApiState;

// ── /status ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct StatusResponse {
    pub chain: CutterStatus,
    pub batch: BatchInfo,
    pub backend: String,
    pub broadcast_addr: String,
    pub sessions: usize,
    pub uptime_secs: u64,
}

#[derive(Serialize)]
pub struct BatchInfo {
    pub max_messages: usize,
    pub period_ms: u64,
    pub queue_capacity: usize,
    pub max_message_bytes: usize,
}

pub async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let chain = state.status.borrow().clone();
    let settings = &state.settings;

    Json(StatusResponse {
        chain,
        batch: BatchInfo {
            max_messages: settings.batch.max_messages,
            period_ms: settings.batch.period.as_millis() as u64,
            queue_capacity: settings.queue_capacity,
            max_message_bytes: settings.limits.max_message_bytes,
        },
        backend: state.backend.to_string(),
        broadcast_addr: state.broadcast_addr.clone(),
        sessions: state.sessions.len(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

// ── /daemon/shutdown ──────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct ShutdownResponse {
    pub message: String,
}

pub async fn handle_shutdown(State(state): State<ApiState>) -> Json<ShutdownResponse> {
    tracing::info!("shutdown requested via API");

    // No receivers means shutdown is already under way.
    let _ = state.shutdown_tx.send(());

    Json(ShutdownResponse {
        message: "Shutdown initiated".to_string(),
    })
}
