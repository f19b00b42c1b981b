//! Shared application state for the web server.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Instant;

use oracle_agent::Orchestrator;

use crate::WebConfig;

/// State shared across all request handlers via `Arc<AppState>`.
#[derive(Debug)]
pub struct AppState {
    /// The orchestration agent; shared by every session.
    pub orchestrator: Arc<Orchestrator>,
    /// Web server configuration.
    pub config: WebConfig,
    /// Number of connected WebSocket sessions.
    pub active_sessions: AtomicUsize,
    /// When the server was created.
    pub started_at: Instant,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, config: WebConfig) -> Self {
        Self {
            orchestrator,
            config,
            active_sessions: AtomicUsize::new(0),
            started_at: Instant::now(),
        }
    }
}
