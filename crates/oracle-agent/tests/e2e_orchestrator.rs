//! End-to-end tests for the agent against local stand-ins of the three
//! provider APIs.
//!
//! Each test starts an axum server on an ephemeral port that speaks just
//! enough of the Anthropic, OpenAI and Gemini wire formats, then points the
//! real clients at it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{Value, json};

use oracle_agent::{
    ChatRequest, ErrorKind, LlmClient, LlmClientConfig, OracleConfig, Query,
};

// ═══════════════════════════════════════════════════════════════════════
//  Mock provider server
// ═══════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct Recorded {
    requests: Mutex<Vec<(String, Value)>>,
}

impl Recorded {
    fn record(&self, route: &str, body: &Value) {
        self.requests
            .lock()
            .unwrap()
            .push((route.to_owned(), body.clone()));
    }

    fn bodies(&self, route: &str) -> Vec<Value> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(r, _)| r == route)
            .map(|(_, b)| b.clone())
            .collect()
    }
}

fn sse(text: String) -> Response {
    ([(header::CONTENT_TYPE, "text/event-stream")], Body::from(text)).into_response()
}

fn anthropic_sse(deltas: &[&str]) -> String {
    let mut out = String::from(
        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"model\":\"mock\"}}\n\n",
    );
    for d in deltas {
        let data = json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": d}});
        out.push_str(&format!("event: content_block_delta\ndata: {data}\n\n"));
    }
    out.push_str("event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"}}\n\n");
    out.push_str("event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
    out
}

async fn anthropic(State(rec): State<Arc<Recorded>>, Json(body): Json<Value>) -> Response {
    rec.record("anthropic", &body);
    if body["stream"] == true {
        sse(anthropic_sse(&["Synthesized", " answer", "."]))
    } else {
        Json(json!({"content": [{"type": "text", "text": "Claude's answer"}]})).into_response()
    }
}

async fn openai(State(rec): State<Arc<Recorded>>, Json(body): Json<Value>) -> Response {
    rec.record("openai", &body);
    Json(json!({
        "choices": [{"index": 0, "message": {"role": "assistant", "content": "GPT's answer"}}]
    }))
    .into_response()
}

async fn gemini(
    State(rec): State<Arc<Recorded>>,
    Path(rest): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    rec.record("gemini", &body);
    if rest.ends_with(":generateContent") {
        Json(json!({"candidates": [{"content": {"parts": [{"text": "Gemini's answer"}]}}]}))
            .into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn spawn(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    format!("http://{addr}")
}

async fn spawn_providers() -> (String, Arc<Recorded>) {
    let rec = Arc::new(Recorded::default());
    let app = Router::new()
        .route("/v1/messages", post(anthropic))
        .route("/chat/completions", post(openai))
        .route("/models/{*rest}", post(gemini))
        .with_state(Arc::clone(&rec));
    (spawn(app).await, rec)
}

fn config_for(base: &str) -> OracleConfig {
    let mut config = OracleConfig::default();
    for p in &mut config.providers {
        p.base_url = Some(base.to_owned());
    }
    config.synthesis.base_url = Some(base.to_owned());
    config.resolve_credentials(|_| Some("test-key".to_owned()));
    config
}

// ═══════════════════════════════════════════════════════════════════════
//  Full pipeline
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn query_fans_out_and_streams_synthesis() {
    let (base, rec) = spawn_providers().await;
    let orchestrator = config_for(&base).build_orchestrator().unwrap();

    let chunks: Vec<String> = orchestrator
        .run(Query::new("Is coffee healthy?"))
        .map(|c| c.unwrap().data)
        .collect()
        .await;
    assert_eq!(chunks, ["Synthesized", " answer", "."]);

    // One non-streaming call per tool plus one streaming synthesis call.
    let anthropic = rec.bodies("anthropic");
    assert_eq!(anthropic.len(), 2);
    assert_eq!(rec.bodies("openai").len(), 1);
    assert_eq!(rec.bodies("gemini").len(), 1);

    let tool_call = anthropic.iter().find(|b| b["stream"] != true).unwrap();
    assert_eq!(tool_call["messages"][0]["content"], "Is coffee healthy?");

    let synthesis = anthropic.iter().find(|b| b["stream"] == true).unwrap();
    let prompt = synthesis["messages"][0]["content"].as_str().unwrap();
    let claude = prompt.find("Claude's answer").unwrap();
    let gpt = prompt.find("GPT's answer").unwrap();
    let gemini = prompt.find("Gemini's answer").unwrap();
    assert!(claude < gpt && gpt < gemini);
}

#[tokio::test]
async fn missing_tool_key_still_answers() {
    let (base, rec) = spawn_providers().await;
    let mut config = config_for(&base);
    config.providers[1].api_key = None;
    let orchestrator = config.build_orchestrator().unwrap();

    let results = orchestrator.gather(&Query::new("q")).await;
    assert_eq!(results.len(), 3);
    assert_eq!(results[1].error().unwrap().kind, ErrorKind::AuthFailure);
    assert!(rec.bodies("openai").is_empty());

    let chunks: Vec<_> = orchestrator.run(Query::new("q")).collect().await;
    assert!(chunks.iter().all(Result::is_ok));
}

// ═══════════════════════════════════════════════════════════════════════
//  Error classification
// ═══════════════════════════════════════════════════════════════════════

async fn status_route(Path(code): Path<u16>) -> Response {
    match code {
        200 => (StatusCode::OK, "this is not json").into_response(),
        201 => Json(json!({"choices": [{"message": {"content": ""}}]})).into_response(),
        _ => (
            StatusCode::from_u16(code).unwrap(),
            Json(json!({"error": {"message": format!("status {code}")}})),
        )
            .into_response(),
    }
}

#[tokio::test]
async fn http_failures_are_classified() {
    let base = spawn(Router::new().route("/{code}/chat/completions", post(status_route))).await;

    let cases = [
        (401, ErrorKind::AuthFailure),
        (403, ErrorKind::AuthFailure),
        (429, ErrorKind::RateLimited),
        (504, ErrorKind::Timeout),
        (500, ErrorKind::Upstream),
        (200, ErrorKind::Malformed),
        (201, ErrorKind::Malformed),
    ];

    for (code, expected) in cases {
        let client = LlmClient::new(LlmClientConfig::openai_compatible(
            "key",
            "model",
            format!("{base}/{code}"),
        ))
        .unwrap();
        let err = client
            .complete(&ChatRequest::single_turn("sys", "hi"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, expected, "status {code}");
    }
}

#[tokio::test]
async fn unreachable_host_is_upstream() {
    // Bind and drop to get a port nobody listens on.
    let port = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().port()
    };
    let client = LlmClient::new(LlmClientConfig::openai_compatible(
        "key",
        "model",
        format!("http://127.0.0.1:{port}"),
    ))
    .unwrap();
    let err = client
        .complete(&ChatRequest::single_turn("sys", "hi"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Upstream);
}

#[tokio::test]
async fn slow_provider_hits_request_deadline() {
    async fn slow() -> Response {
        tokio::time::sleep(Duration::from_secs(5)).await;
        StatusCode::OK.into_response()
    }
    let base = spawn(Router::new().route("/chat/completions", post(slow))).await;

    let client = LlmClient::new(
        LlmClientConfig::openai_compatible("key", "model", base)
            .with_request_timeout(Duration::from_millis(100)),
    )
    .unwrap();
    let err = client
        .complete(&ChatRequest::single_turn("sys", "hi"))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
}

// ═══════════════════════════════════════════════════════════════════════
//  Streaming
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn openai_stream_survives_split_utf8() {
    async fn chunked() -> Response {
        let text = "data: {\"choices\":[{\"delta\":{\"content\":\"caf\u{e9} \u{2615}\"}}]}\n\ndata: [DONE]\n\n";
        let bytes = text.as_bytes().to_vec();
        // Split every 7 bytes, which lands inside the multi-byte characters.
        let parts: Vec<Result<Bytes, std::io::Error>> = bytes
            .chunks(7)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        (
            [(header::CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(futures::stream::iter(parts)),
        )
            .into_response()
    }
    let base = spawn(Router::new().route("/chat/completions", post(chunked))).await;

    let client =
        LlmClient::new(LlmClientConfig::openai_compatible("key", "model", base)).unwrap();
    let text: Vec<String> = client
        .stream(&ChatRequest::single_turn("sys", "hi"))
        .await
        .unwrap()
        .map(|d| d.unwrap())
        .collect()
        .await;
    assert_eq!(text.concat(), "caf\u{e9} \u{2615}");
}

#[tokio::test]
async fn gemini_stream_ends_with_body() {
    async fn stream(Path(rest): Path<String>) -> Response {
        assert!(rest.ends_with(":streamGenerateContent"));
        sse(concat!(
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\n\n",
            "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"}]},\"finishReason\":\"STOP\"}]}",
        )
        .to_owned())
    }
    let base = spawn(Router::new().route("/models/{*rest}", post(stream))).await;

    let client = LlmClient::new(
        LlmClientConfig::gemini("key", "gemini-2.5-flash").with_base_url(base),
    )
    .unwrap();
    let text: Vec<String> = client
        .stream(&ChatRequest::single_turn("sys", "hi"))
        .await
        .unwrap()
        .map(|d| d.unwrap())
        .collect()
        .await;
    assert_eq!(text, ["Hel", "lo"]);
}

#[tokio::test]
async fn stalled_stream_times_out() {
    async fn stall() -> Response {
        let first: Result<Bytes, std::io::Error> = Ok(Bytes::from_static(
            b"event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"delta\":{\"type\":\"text_delta\",\"text\":\"Hi\"}}\n\n",
        ));
        let body = futures::stream::iter(vec![first]).chain(futures::stream::pending());
        (
            [(header::CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(body),
        )
            .into_response()
    }
    let base = spawn(Router::new().route("/v1/messages", post(stall))).await;

    let mut config = LlmClientConfig::anthropic("key", "claude").with_base_url(base);
    config.stream_idle_timeout = Duration::from_millis(200);
    let client = LlmClient::new(config).unwrap();

    let items: Vec<_> = client
        .stream(&ChatRequest::single_turn("sys", "hi"))
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(items.len(), 2);
    assert_eq!(items[0].as_deref().unwrap(), "Hi");
    assert_eq!(items[1].as_ref().unwrap_err().kind, ErrorKind::Timeout);
}

#[tokio::test]
async fn streaming_error_status_fails_before_first_chunk() {
    let base = spawn(Router::new().route("/{code}/v1/messages", post(status_route))).await;

    let client = LlmClient::new(
        LlmClientConfig::anthropic("key", "claude").with_base_url(format!("{base}/429")),
    )
    .unwrap();
    let err = client
        .stream(&ChatRequest::single_turn("sys", "hi"))
        .await
        .err()
        .unwrap();
    assert_eq!(err.kind, ErrorKind::RateLimited);
}

#[tokio::test]
async fn error_status_with_stalled_body_fails_within_deadline() {
    async fn half_error() -> Response {
        let first: Result<Bytes, std::io::Error> = Ok(Bytes::from_static(b"{\"error\":"));
        let body = futures::stream::iter(vec![first]).chain(futures::stream::pending());
        (StatusCode::INTERNAL_SERVER_ERROR, Body::from_stream(body)).into_response()
    }
    let base = spawn(Router::new().route("/chat/completions", post(half_error))).await;

    let client = LlmClient::new(
        LlmClientConfig::openai_compatible("key", "model", base)
            .with_request_timeout(Duration::from_millis(200)),
    )
    .unwrap();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        client.stream(&ChatRequest::single_turn("sys", "hi")),
    )
    .await
    .expect("error body read is bounded by the request deadline");
    let err = result.err().unwrap();
    assert_eq!(err.kind, ErrorKind::Upstream);
    assert!(err.message.contains("500"));
}
