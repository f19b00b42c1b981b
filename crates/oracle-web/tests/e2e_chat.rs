//! End-to-end tests for the `/chat` WebSocket and `/api/status`.
//!
//! These tests spin up the **real** Axum server on an OS-assigned ephemeral
//! port and talk to it with a `tokio-tungstenite` client, so the full path
//! (upgrade, JSON framing, session driver, orchestrator) is exercised.
//! Providers and synthesis are in-process fakes.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use oracle_agent::{
    Orchestrator, OrchestratorConfig, Provider, ProviderError, SynthesisInput, Synthesizer,
    TextStream, Tool, ToolRegistry,
};
use oracle_web::{ServerFrame, WebConfig, WebServer};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

// ── fakes ────────────────────────────────────────────────────────────────────

struct Echo;

#[async_trait]
impl Provider for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    async fn invoke(&self, prompt: &str) -> Result<String, ProviderError> {
        Ok(format!("echo: {prompt}"))
    }
}

struct Hanging {
    started: Arc<AtomicBool>,
    dropped: Arc<AtomicBool>,
}

struct SetOnDrop(Arc<AtomicBool>);

impl Drop for SetOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Provider for Hanging {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn invoke(&self, _prompt: &str) -> Result<String, ProviderError> {
        let _guard = SetOnDrop(Arc::clone(&self.dropped));
        self.started.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(String::new())
    }
}

/// Streams each line of the first source answer as a chunk, slowly enough
/// that a second query can arrive mid-answer.
struct LineByLine;

#[async_trait]
impl Synthesizer for LineByLine {
    fn model(&self) -> &str {
        "line-by-line"
    }

    async fn stream(&self, input: &SynthesisInput) -> Result<TextStream, ProviderError> {
        let answer = input.results[0].content().unwrap_or("nothing").to_owned();
        let words: Vec<Result<String, ProviderError>> =
            answer.split_inclusive(' ').map(|w| Ok(w.to_owned())).collect();
        Ok(Box::pin(futures::stream::iter(words).then(|w| async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            w
        })))
    }
}

// ── helpers ──────────────────────────────────────────────────────────────────

fn orchestrator(provider: Arc<dyn Provider>) -> Arc<Orchestrator> {
    let mut tools = ToolRegistry::new();
    tools
        .register(Tool::new("ask_echo", "Echoes the prompt.", provider))
        .unwrap();
    Arc::new(Orchestrator::new(
        tools,
        Arc::new(LineByLine),
        OrchestratorConfig::default(),
    ))
}

/// Bind to 127.0.0.1:0, start the server, return (host:port, shutdown).
async fn start_test_server(orchestrator: Arc<Orchestrator>) -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind to port 0");
    let addr = listener.local_addr().expect("get local addr").to_string();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = WebServer::new(WebConfig::default(), orchestrator);
    tokio::spawn(async move {
        server
            .serve(listener, async {
                let _ = stop_rx.await;
            })
            .await
            .ok();
    });

    // Small yield so the listener is ready.
    tokio::time::sleep(Duration::from_millis(10)).await;

    (addr, stop_tx)
}

async fn connect(addr: &str) -> Client {
    let (ws, _) = connect_async(format!("ws://{addr}/chat"))
        .await
        .expect("websocket handshake");
    ws
}

async fn send_text(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.into())).await.expect("send");
}

async fn next_frame(ws: &mut Client) -> ServerFrame {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("frame within 5s")
            .expect("socket open")
            .expect("read ok");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).expect("valid frame JSON");
        }
    }
}

/// Read frames up to and including the first non-chunk frame.
async fn until_terminal(ws: &mut Client) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    loop {
        let frame = next_frame(ws).await;
        let terminal = !matches!(frame, ServerFrame::Chunk(_));
        frames.push(frame);
        if terminal {
            return frames;
        }
    }
}

async fn status(addr: &str) -> serde_json::Value {
    reqwest::get(format!("http://{addr}/api/status"))
        .await
        .expect("request failed")
        .json()
        .await
        .expect("invalid JSON")
}

async fn wait_for(flag: &AtomicBool) -> bool {
    for _ in 0..200 {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ── /api/status ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn status_lists_tools_and_synthesis_model() {
    let (addr, _stop) = start_test_server(orchestrator(Arc::new(Echo))).await;

    let json = status(&addr).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["synthesis_model"], "line-by-line");
    assert_eq!(json["active_sessions"], 0);
    assert_eq!(json["tools"][0]["name"], "ask_echo");
    assert_eq!(json["tools"][0]["input_schema"]["required"][0], "prompt");
    assert!(json["uptime_seconds"].is_u64());
}

#[tokio::test]
async fn status_counts_connected_sessions() {
    let (addr, _stop) = start_test_server(orchestrator(Arc::new(Echo))).await;

    let mut ws = connect(&addr).await;
    let mut seen = 0;
    for _ in 0..100 {
        seen = status(&addr).await["active_sessions"].as_u64().unwrap();
        if seen == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(seen, 1);

    ws.close(None).await.ok();
    for _ in 0..100 {
        seen = status(&addr).await["active_sessions"].as_u64().unwrap();
        if seen == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(seen, 0);
}

// ── /chat ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn query_streams_chunks_then_done() {
    let (addr, _stop) = start_test_server(orchestrator(Arc::new(Echo))).await;
    let mut ws = connect(&addr).await;

    send_text(&mut ws, r#"{"content":"what is rust"}"#).await;
    let frames = until_terminal(&mut ws).await;

    assert_eq!(frames.last(), Some(&ServerFrame::Done));
    let text: String = frames
        .iter()
        .filter_map(|f| match f {
            ServerFrame::Chunk(s) => Some(s.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "echo: what is rust");
    assert!(frames.len() > 2, "answer should arrive in several chunks");

    // Same connection, next query.
    send_text(&mut ws, r#"{"content":"again"}"#).await;
    assert_eq!(until_terminal(&mut ws).await.last(), Some(&ServerFrame::Done));
}

#[tokio::test]
async fn busy_and_malformed_frames_get_error_frames() {
    let (addr, _stop) = start_test_server(orchestrator(Arc::new(Echo))).await;
    let mut ws = connect(&addr).await;

    send_text(&mut ws, "this is not json").await;
    assert!(matches!(next_frame(&mut ws).await, ServerFrame::Error(_)));

    send_text(&mut ws, r#"{"content":"one two three four"}"#).await;
    send_text(&mut ws, r#"{"content":"interrupting"}"#).await;

    let mut saw_busy = false;
    let mut chunks = String::new();
    loop {
        match next_frame(&mut ws).await {
            ServerFrame::Chunk(s) => chunks.push_str(&s),
            ServerFrame::Error(msg) => {
                assert!(msg.contains("already in progress"), "{msg}");
                saw_busy = true;
            }
            ServerFrame::Done => break,
        }
    }
    assert!(saw_busy);
    assert_eq!(chunks, "echo: one two three four");
}

#[tokio::test]
async fn binary_frames_are_rejected() {
    let (addr, _stop) = start_test_server(orchestrator(Arc::new(Echo))).await;
    let mut ws = connect(&addr).await;

    ws.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();
    match next_frame(&mut ws).await {
        ServerFrame::Error(msg) => assert!(msg.contains("binary")),
        other => panic!("expected error frame, got {other:?}"),
    }
}

#[tokio::test]
async fn cancel_frame_aborts_the_query() {
    let started = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicBool::new(false));
    let provider = Arc::new(Hanging {
        started: Arc::clone(&started),
        dropped: Arc::clone(&dropped),
    });
    let (addr, _stop) = start_test_server(orchestrator(provider)).await;
    let mut ws = connect(&addr).await;

    send_text(&mut ws, r#"{"content":"slow"}"#).await;
    assert!(wait_for(&started).await);

    send_text(&mut ws, r#"{"type":"cancel"}"#).await;
    assert_eq!(
        next_frame(&mut ws).await,
        ServerFrame::Error("query cancelled".into())
    );
    assert!(wait_for(&dropped).await);
}

#[tokio::test]
async fn disconnect_cancels_in_flight_providers() {
    let started = Arc::new(AtomicBool::new(false));
    let dropped = Arc::new(AtomicBool::new(false));
    let provider = Arc::new(Hanging {
        started: Arc::clone(&started),
        dropped: Arc::clone(&dropped),
    });
    let (addr, _stop) = start_test_server(orchestrator(provider)).await;
    let mut ws = connect(&addr).await;

    send_text(&mut ws, r#"{"content":"slow"}"#).await;
    assert!(wait_for(&started).await);

    ws.close(None).await.ok();
    drop(ws);
    assert!(wait_for(&dropped).await);
}

#[tokio::test]
async fn server_stops_on_shutdown_signal() {
    let (addr, stop) = start_test_server(orchestrator(Arc::new(Echo))).await;
    assert_eq!(status(&addr).await["status"], "ok");

    stop.send(()).unwrap();
    let mut refused = false;
    for _ in 0..100 {
        if TcpStream::connect(&addr).await.is_err() {
            refused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(refused);
}
