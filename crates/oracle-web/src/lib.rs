//! WebSocket front end for the Oracle agent.
//!
//! This crate exposes the orchestrator over HTTP:
//!
//! - `GET /chat` -- WebSocket endpoint streaming synthesized answers.
//! - `GET /api/status` -- Server status and the configured tools.
//!
//! Session handling lives in [`session`] and is independent of the
//! transport; [`ws`] adapts an axum WebSocket to it.

pub mod api;
pub mod error;
pub mod protocol;
pub mod server;
pub mod session;
pub mod state;
pub mod ws;

use serde::{Deserialize, Serialize};

pub use error::SessionError;
pub use protocol::{ClientFrame, ServerFrame};
pub use server::WebServer;
pub use session::{Inbound, Session, SessionOptions, SessionState, drive_session};
pub use state::AppState;

/// Web server configuration.  Read from the `[server]` table of the config
/// file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// The address to bind the HTTP server to.
    pub bind_addr: String,
    /// The port to listen on.
    pub port: u16,
    /// Send `{"type":"done"}` after each answer.
    pub emit_done_frame: bool,
    /// Largest accepted query, in bytes.
    pub max_query_bytes: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 8000,
            emit_done_frame: true,
            max_query_bytes: 16 * 1024,
        }
    }
}

impl WebConfig {
    /// Extract the `[server]` table from a config file; other tables are
    /// ignored.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        #[derive(Deserialize, Default)]
        #[serde(default)]
        struct File {
            server: WebConfig,
        }
        Ok(toml::from_str::<File>(text)?.server)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            emit_done_frame: self.emit_done_frame,
            max_query_bytes: self.max_query_bytes,
        }
    }
}
