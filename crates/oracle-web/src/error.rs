//! Session-level error types.

/// Errors raised while driving a client session.
///
/// Every variant is reported to the client as an error frame; none of them
/// ends the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// The inbound frame could not be understood.
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A query arrived while another one was still being answered.
    #[error("a query is already in progress; wait for it to finish or cancel it")]
    Busy,

    /// The session has been closed.
    #[error("session is closed")]
    Closed,

    /// A cancel arrived while no query was in progress.
    #[error("no query is in progress")]
    NotActive,
}

impl SessionError {
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::ProtocolError(reason.into())
    }
}
