//! JSON frames exchanged over `/chat`.
//!
//! Client to server:
//!
//! ```json
//! {"content": "Why is the sky blue?"}
//! {"type": "cancel"}
//! ```
//!
//! Server to client:
//!
//! ```json
//! {"type": "chunk", "data": "Rayleigh scattering ..."}
//! {"type": "error", "data": "a query is already in progress; ..."}
//! {"type": "done"}
//! ```

use serde::{Deserialize, Serialize};

use oracle_agent::Query;

use crate::error::SessionError;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// A decoded client frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Ask a question.
    Query(Query),
    /// Abandon the query in progress.
    Cancel,
}

#[derive(Deserialize)]
struct RawFrame {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

impl ClientFrame {
    /// Decode one text frame.  Query content must be non-blank and at most
    /// `max_query_bytes` long.
    pub fn parse(text: &str, max_query_bytes: usize) -> Result<Self, SessionError> {
        let raw: RawFrame = serde_json::from_str(text)
            .map_err(|e| SessionError::protocol(format!("invalid frame: {e}")))?;

        match raw.kind.as_deref() {
            Some("cancel") => Ok(Self::Cancel),
            None | Some("query") => {
                let content = raw
                    .content
                    .ok_or_else(|| SessionError::protocol("missing `content` field"))?;
                if content.trim().is_empty() {
                    return Err(SessionError::protocol("query content is empty"));
                }
                if content.len() > max_query_bytes {
                    return Err(SessionError::protocol(format!(
                        "query is {} bytes; the limit is {max_query_bytes}",
                        content.len()
                    )));
                }
                Ok(Self::Query(Query::new(content)))
            }
            Some(other) => Err(SessionError::protocol(format!("unknown frame type `{other}`"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// A frame sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum ServerFrame {
    /// The next fragment of the answer.
    Chunk(String),
    /// Something went wrong; the session stays usable.
    Error(String),
    /// The answer is complete.
    Done,
}

impl ServerFrame {
    pub fn error(e: impl std::fmt::Display) -> Self {
        Self::Error(e.to_string())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
