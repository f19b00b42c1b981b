//! REST API route handlers.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use oracle_agent::ToolDefinition;

use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET /api/status
// ---------------------------------------------------------------------------

/// Response payload for the `/api/status` endpoint.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub active_sessions: usize,
    pub tools: Vec<ToolDefinition>,
    pub synthesis_model: String,
}

/// Report server health and the configured tools.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.started_at.elapsed().as_secs(),
        active_sessions: state.active_sessions.load(Ordering::Relaxed),
        tools: state.orchestrator.tools().definitions(),
        synthesis_model: state.orchestrator.synthesis_model().to_owned(),
    })
}
