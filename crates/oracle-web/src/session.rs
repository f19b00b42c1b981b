//! Streaming session manager.
//!
//! One [`Session`] exists per client connection.  It moves
//! `open -> active -> open -> ... -> closed`, with at most one query active
//! at a time.  [`drive_session`] runs the whole lifecycle over any
//! transport that can be expressed as a stream of [`Inbound`] events and a
//! sink of [`ServerFrame`]s; the WebSocket handler in [`crate::ws`] is a
//! thin adapter around it.

use std::fmt::Display;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use oracle_agent::{AgentError, ChunkStream, Orchestrator, Query, ResponseChunk};

use crate::error::SessionError;
use crate::protocol::{ClientFrame, ServerFrame};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected and idle.
    Open,
    /// A query is being answered.
    Active,
    /// Disconnected; terminal.
    Closed,
}

/// Per-connection bookkeeping.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    state: SessionState,
    pending_query: Option<Query>,
    pub started_at: DateTime<Utc>,
    /// Queries that ran to completion (successfully or not).
    pub queries_finished: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            id: Uuid::now_v7(),
            state: SessionState::Open,
            pending_query: None,
            started_at: Utc::now(),
            queries_finished: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The query being answered, if any.
    pub fn pending_query(&self) -> Option<&Query> {
        self.pending_query.as_ref()
    }

    /// `open -> active`.
    pub fn begin(&mut self, query: Query) -> Result<(), SessionError> {
        match self.state {
            SessionState::Open => {
                self.state = SessionState::Active;
                self.pending_query = Some(query);
                Ok(())
            }
            SessionState::Active => Err(SessionError::Busy),
            SessionState::Closed => Err(SessionError::Closed),
        }
    }

    /// `active -> open`.  Returns the query that was in progress.
    pub fn finish(&mut self) -> Result<Query, SessionError> {
        match self.state {
            SessionState::Active => {
                self.state = SessionState::Open;
                self.queries_finished += 1;
                self.pending_query.take().ok_or(SessionError::NotActive)
            }
            SessionState::Open => Err(SessionError::NotActive),
            SessionState::Closed => Err(SessionError::Closed),
        }
    }

    /// Any state `-> closed`.  Returns the query that was abandoned, if any.
    pub fn close(&mut self) -> Option<Query> {
        self.state = SessionState::Closed;
        self.pending_query.take()
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

/// Transport-neutral inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A text frame.
    Text(String),
    /// A binary frame (unsupported).
    Binary,
    /// The peer closed the connection.
    Close,
    /// Transport-level traffic with no meaning here (ping, pong).
    Ignored,
}

/// Per-session protocol settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Send `{"type":"done"}` after every successful answer.
    pub emit_done_frame: bool,
    /// Largest accepted query, in bytes.
    pub max_query_bytes: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            emit_done_frame: true,
            max_query_bytes: 16 * 1024,
        }
    }
}

/// Run one session until the peer disconnects.
///
/// Inbound frames and answer chunks are multiplexed so a cancel or a
/// disconnect is noticed mid-answer.  The next chunk is only pulled once the
/// previous frame has been written.  Dropping the in-flight answer stream
/// cancels its provider calls.
pub async fn drive_session<I, O>(
    mut inbound: I,
    mut outbound: O,
    orchestrator: Arc<Orchestrator>,
    options: SessionOptions,
) -> Session
where
    I: Stream<Item = Inbound> + Unpin,
    O: Sink<ServerFrame> + Unpin,
    O::Error: Display,
{
    let mut session = Session::new();
    let mut active: Option<ChunkStream> = None;
    let mut chunks_sent = 0usize;

    info!(session_id = %session.id, "session opened");

    loop {
        tokio::select! {
            biased;

            event = inbound.next() => {
                let reply = match event {
                    None | Some(Inbound::Close) => break,
                    Some(Inbound::Ignored) => continue,
                    Some(Inbound::Binary) => {
                        Some(ServerFrame::error(SessionError::protocol("binary frames are not supported")))
                    }
                    Some(Inbound::Text(text)) => match ClientFrame::parse(&text, options.max_query_bytes) {
                        Err(e) => {
                            debug!(session_id = %session.id, error = %e, "rejected frame");
                            Some(ServerFrame::error(e))
                        }
                        Ok(ClientFrame::Query(query)) => match session.begin(query.clone()) {
                            Ok(()) => {
                                info!(session_id = %session.id, query_len = query.content.len(), "query started");
                                active = Some(orchestrator.run(query));
                                chunks_sent = 0;
                                None
                            }
                            Err(e) => Some(ServerFrame::error(e)),
                        },
                        Ok(ClientFrame::Cancel) => match session.finish() {
                            Ok(_) => {
                                active = None;
                                info!(session_id = %session.id, "query cancelled by client");
                                Some(ServerFrame::Error("query cancelled".into()))
                            }
                            Err(e) => Some(ServerFrame::error(e)),
                        },
                    },
                };

                if let Some(frame) = reply {
                    if !send(&mut outbound, frame, &session).await {
                        break;
                    }
                }
            }

            item = next_chunk(&mut active) => {
                let frame = match item {
                    Some(Ok(chunk)) => {
                        chunks_sent += 1;
                        Some(ServerFrame::Chunk(chunk.data))
                    }
                    Some(Err(e)) => {
                        warn!(session_id = %session.id, error = %e, "query failed");
                        active = None;
                        let _ = session.finish();
                        Some(ServerFrame::error(e))
                    }
                    None => {
                        active = None;
                        let _ = session.finish();
                        info!(session_id = %session.id, chunks = chunks_sent, "query finished");
                        if options.emit_done_frame {
                            Some(ServerFrame::Done)
                        } else if chunks_sent == 0 {
                            Some(ServerFrame::Error("no response was produced".into()))
                        } else {
                            None
                        }
                    }
                };

                if let Some(frame) = frame {
                    if !send(&mut outbound, frame, &session).await {
                        break;
                    }
                }
            }
        }
    }

    if active.take().is_some() {
        info!(session_id = %session.id, "client left mid-query; cancelling");
    }
    session.close();
    let _ = outbound.close().await;

    info!(
        session_id = %session.id,
        queries = session.queries_finished,
        "session closed"
    );
    session
}

/// Next item of the active answer; pends forever while idle.
async fn next_chunk(active: &mut Option<ChunkStream>) -> Option<Result<ResponseChunk, AgentError>> {
    match active.as_mut() {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Write one frame.  `false` means the peer is gone.
async fn send<O>(outbound: &mut O, frame: ServerFrame, session: &Session) -> bool
where
    O: Sink<ServerFrame> + Unpin,
    O::Error: Display,
{
    match outbound.send(frame).await {
        Ok(()) => true,
        Err(e) => {
            debug!(session_id = %session.id, error = %e, "send failed; treating as disconnect");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
