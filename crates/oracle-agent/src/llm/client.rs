//! Multi-provider LLM client.
//!
//! Supports the **Anthropic Messages API**, the **OpenAI Chat Completions
//! API** (including OpenAI-compatible endpoints such as Ollama and vLLM) and
//! the **Gemini `generateContent` API**, each in non-streaming and streaming
//! SSE modes.
//!
//! Every failure is reported as a [`ProviderError`] so that callers can tell
//! an expired credential from throttling, a deadline, a server error or an
//! unparseable answer.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, Stream};
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{AgentError, ProviderError};
use crate::llm::streaming::SseParser;
use crate::llm::streaming_gemini::{GeminiStreamDecoder, candidate_text};
use crate::llm::streaming_openai::OpenAiStreamDecoder;
use crate::llm::types::{ChatRequest, Message, Role, StreamEvent};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default Anthropic API base URL.
pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";

/// Default OpenAI API base URL.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default Gemini API base URL.
pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic beta header required for OAuth token authentication.
const ANTHROPIC_OAUTH_BETA: &str = "oauth-2025-04-20";

/// A stream of answer text fragments, in arrival order.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

// ---------------------------------------------------------------------------
// Provider enum
// ---------------------------------------------------------------------------

/// Identifies which wire protocol the client speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Anthropic Messages API.
    Anthropic,
    /// OpenAI Chat Completions API (also covers OpenAI-compatible endpoints).
    #[serde(rename = "openai")]
    OpenAI,
    /// Google Gemini `generateContent` API.
    Gemini,
}

impl LlmProvider {
    /// Lower-case provider label used in logs and config files.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAI => "openai",
            Self::Gemini => "gemini",
        }
    }

    /// The public API endpoint for this provider.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Anthropic => ANTHROPIC_BASE_URL,
            Self::OpenAI => OPENAI_BASE_URL,
            Self::Gemini => GEMINI_BASE_URL,
        }
    }
}

// ---------------------------------------------------------------------------
// Client configuration
// ---------------------------------------------------------------------------

/// Configuration for connecting to a single LLM provider endpoint.
#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    /// Which provider this configuration targets.
    pub provider: LlmProvider,
    /// API key for authentication.  Empty means "not configured"; every call
    /// then fails with an auth error without touching the network.
    pub api_key: String,
    /// Base URL for the API.
    pub base_url: String,
    /// Default model identifier.
    pub default_model: String,
    /// Default maximum tokens per response.
    pub max_tokens: u32,
    /// Deadline for a complete non-streaming call, and for the response
    /// headers of a streaming call.
    pub request_timeout: Duration,
    /// Longest silence tolerated between two reads of a streaming body.
    pub stream_idle_timeout: Duration,
}

impl LlmClientConfig {
    /// Configuration for `provider` at its public endpoint.
    pub fn new(
        provider: LlmProvider,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            base_url: provider.default_base_url().to_owned(),
            default_model: model.into(),
            max_tokens: 4096,
            request_timeout: Duration::from_secs(120),
            stream_idle_timeout: Duration::from_secs(60),
        }
    }

    /// Create a configuration for the Anthropic Claude API.
    pub fn anthropic(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(LlmProvider::Anthropic, api_key, model)
    }

    /// Create a configuration for the OpenAI API.
    pub fn openai(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(LlmProvider::OpenAI, api_key, model)
    }

    /// Create a configuration for the Gemini API.
    pub fn gemini(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self::new(LlmProvider::Gemini, api_key, model)
    }

    /// Create a configuration for any OpenAI-compatible API (e.g. Ollama,
    /// Together, vLLM).
    pub fn openai_compatible(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::new(LlmProvider::OpenAI, api_key, model)
        }
    }

    /// Builder: override the base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Builder: override the request deadline.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// An LLM client for one provider endpoint.
///
/// Cloning is cheap: the configuration is shared and `reqwest::Client`
/// pools connections internally, so one client can serve any number of
/// concurrent calls.
#[derive(Debug, Clone)]
pub struct LlmClient {
    config: Arc<LlmClientConfig>,
    http: reqwest::Client,
}

impl LlmClient {
    /// Create a new client with its own connection pool.
    pub fn new(config: LlmClientConfig) -> crate::error::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AgentError::ConfigError {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self::with_http(config, http))
    }

    /// Create a client that shares an existing connection pool.
    pub fn with_http(config: LlmClientConfig, http: reqwest::Client) -> Self {
        Self {
            config: Arc::new(config),
            http,
        }
    }

    /// Returns the provider this client talks to.
    pub fn provider(&self) -> LlmProvider {
        self.config.provider
    }

    /// Returns the model used when a request does not name one.
    pub fn default_model(&self) -> &str {
        &self.config.default_model
    }

    /// Whether an API key is present.
    pub fn has_credentials(&self) -> bool {
        !self.config.api_key.trim().is_empty()
    }

    fn require_key(&self) -> Result<&str, ProviderError> {
        let key = self.config.api_key.trim();
        if key.is_empty() {
            return Err(ProviderError::auth(format!(
                "no API key configured for provider {}",
                self.config.provider.as_str()
            )));
        }
        Ok(key)
    }

    fn model_for<'a>(&'a self, request: &'a ChatRequest) -> &'a str {
        if request.model.is_empty() {
            &self.config.default_model
        } else {
            &request.model
        }
    }

    // -----------------------------------------------------------------------
    // Public API
    // -----------------------------------------------------------------------

    /// Send a chat request and return the full answer text (non-streaming).
    ///
    /// The whole exchange is bounded by
    /// [`LlmClientConfig::request_timeout`].
    pub async fn complete(&self, request: &ChatRequest) -> Result<String, ProviderError> {
        let deadline = self.config.request_timeout;
        match tokio::time::timeout(deadline, self.complete_inner(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::timeout(format!(
                "{} did not answer within {deadline:?}",
                self.config.provider.as_str()
            ))),
        }
    }

    async fn complete_inner(&self, request: &ChatRequest) -> Result<String, ProviderError> {
        let resp = self.send(request, false).await?;

        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(ProviderError::from_status(status, &text));
        }

        let v: Value = serde_json::from_str(&text)
            .map_err(|e| ProviderError::malformed(format!("invalid JSON response: {e}")))?;

        let answer = match self.config.provider {
            LlmProvider::Anthropic => parse_anthropic_response(&v)?,
            LlmProvider::OpenAI => parse_openai_response(&v)?,
            LlmProvider::Gemini => parse_gemini_response(&v)?,
        };

        if answer.trim().is_empty() {
            return Err(ProviderError::malformed("response contained no text"));
        }
        Ok(answer)
    }

    /// Send a chat request in streaming mode.
    ///
    /// Resolves once the provider has accepted the request (bounded by
    /// [`LlmClientConfig::request_timeout`]).  The returned stream is lazy:
    /// the body is only read as the caller polls it, so a slow consumer
    /// slows the read instead of growing a buffer.  Each read is bounded by
    /// [`LlmClientConfig::stream_idle_timeout`].
    pub async fn stream(&self, request: &ChatRequest) -> Result<TextStream, ProviderError> {
        let deadline = self.config.request_timeout;
        let resp = match tokio::time::timeout(deadline, self.send(request, true)).await {
            Ok(resp) => resp?,
            Err(_) => {
                return Err(ProviderError::timeout(format!(
                    "{} did not start streaming within {deadline:?}",
                    self.config.provider.as_str()
                )));
            }
        };

        let status = resp.status();
        if !status.is_success() {
            // The error body gets the same deadline as the headers.
            let text = match tokio::time::timeout(deadline, resp.text()).await {
                Ok(body) => body.unwrap_or_default(),
                Err(_) => {
                    tracing::debug!(status = %status, "error body did not arrive in time");
                    String::new()
                }
            };
            return Err(ProviderError::from_status(status, &text));
        }

        let state = StreamState {
            body: resp.bytes_stream().map_ok(|b| b.to_vec()).boxed(),
            lines: LineBuffer::default(),
            decoder: StreamDecoder::for_provider(self.config.provider),
            idle_timeout: self.config.stream_idle_timeout,
            eof: false,
            finished: false,
        };

        let stream = futures::stream::unfold(state, |mut state| async move {
            let item = state.next_delta().await?;
            Some((item, state))
        });
        Ok(Box::pin(stream))
    }

    // -----------------------------------------------------------------------
    // Request dispatch
    // -----------------------------------------------------------------------

    async fn send(&self, request: &ChatRequest, stream: bool) -> Result<reqwest::Response, ProviderError> {
        let api_key = self.require_key()?;
        let model = self.model_for(request);
        let base = self.config.base_url.trim_end_matches('/');

        let (url, headers, body) = match self.config.provider {
            LlmProvider::Anthropic => (
                format!("{base}/v1/messages"),
                anthropic_headers(api_key)?,
                self.build_anthropic_request_body(request, model, stream),
            ),
            LlmProvider::OpenAI => (
                format!("{base}/chat/completions"),
                bearer_headers(api_key)?,
                self.build_openai_request_body(request, model, stream),
            ),
            LlmProvider::Gemini => {
                let url = if stream {
                    format!("{base}/models/{model}:streamGenerateContent?alt=sse")
                } else {
                    format!("{base}/models/{model}:generateContent")
                };
                (url, gemini_headers(api_key)?, self.build_gemini_request_body(request))
            }
        };

        tracing::debug!(
            url = %url,
            model = %model,
            provider = self.config.provider.as_str(),
            stream,
            "sending LLM request"
        );

        Ok(self.http.post(&url).headers(headers).json(&body).send().await?)
    }

    // -- Request bodies ------------------------------------------------------

    /// Build the JSON body for the Anthropic Messages API.
    fn build_anthropic_request_body(&self, request: &ChatRequest, model: &str, stream: bool) -> Value {
        let (system_text, messages) = messages_to_anthropic(&request.messages);

        let mut body = json!({
            "model": model,
            "max_tokens": request.max_tokens.unwrap_or(self.config.max_tokens),
            "messages": messages,
        });
        if let Some(system) = system_text {
            body["system"] = json!(system);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    /// Build the JSON body for the OpenAI Chat Completions API.
    ///
    /// The hosted OpenAI API takes `max_completion_tokens` (required by the
    /// reasoning models); compatible servers still expect `max_tokens`.
    fn build_openai_request_body(&self, request: &ChatRequest, model: &str, stream: bool) -> Value {
        let mut body = json!({
            "model": model,
            "messages": messages_to_openai(&request.messages),
        });

        let max_tokens = request.max_tokens.unwrap_or(self.config.max_tokens);
        if self.config.base_url.starts_with(OPENAI_BASE_URL) {
            body["max_completion_tokens"] = json!(max_tokens);
        } else {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    /// Build the JSON body for the Gemini `generateContent` API.
    fn build_gemini_request_body(&self, request: &ChatRequest) -> Value {
        let (system_text, contents) = messages_to_gemini(&request.messages);

        let mut generation_config = json!({
            "maxOutputTokens": request.max_tokens.unwrap_or(self.config.max_tokens),
        });
        if let Some(temp) = request.temperature {
            generation_config["temperature"] = json!(temp);
        }

        let mut body = json!({
            "contents": contents,
            "generationConfig": generation_config,
        });
        if let Some(system) = system_text {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        body
    }
}

// ---------------------------------------------------------------------------
// Headers
// ---------------------------------------------------------------------------

fn header_value(value: &str) -> Result<HeaderValue, ProviderError> {
    HeaderValue::from_str(value)
        .map_err(|e| ProviderError::auth(format!("API key is not a valid header value: {e}")))
}

/// Standard API keys go in `x-api-key`; OAuth tokens (`sk-ant-oat…`) use
/// bearer auth plus the OAuth beta header.
fn anthropic_headers(api_key: &str) -> Result<HeaderMap, ProviderError> {
    let mut headers = HeaderMap::new();
    if api_key.starts_with("sk-ant-oat") {
        headers.insert(AUTHORIZATION, header_value(&format!("Bearer {api_key}"))?);
        headers.insert("anthropic-beta", HeaderValue::from_static(ANTHROPIC_OAUTH_BETA));
    } else {
        headers.insert("x-api-key", header_value(api_key)?);
    }
    headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

fn bearer_headers(api_key: &str) -> Result<HeaderMap, ProviderError> {
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, header_value(&format!("Bearer {api_key}"))?);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

fn gemini_headers(api_key: &str) -> Result<HeaderMap, ProviderError> {
    let mut headers = HeaderMap::new();
    headers.insert("x-goog-api-key", header_value(api_key)?);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// Per-provider SSE decoder.
enum StreamDecoder {
    Anthropic(SseParser),
    OpenAI(OpenAiStreamDecoder),
    Gemini(GeminiStreamDecoder),
}

impl StreamDecoder {
    fn for_provider(provider: LlmProvider) -> Self {
        match provider {
            LlmProvider::Anthropic => Self::Anthropic(SseParser::new()),
            LlmProvider::OpenAI => Self::OpenAI(OpenAiStreamDecoder::new()),
            LlmProvider::Gemini => Self::Gemini(GeminiStreamDecoder::new()),
        }
    }

    fn feed_line(&mut self, line: &str) -> Result<Option<StreamEvent>, ProviderError> {
        match self {
            Self::Anthropic(p) => p.parse_line(line),
            Self::OpenAI(d) => d.feed_line(line),
            Self::Gemini(d) => d.feed_line(line),
        }
    }
}

/// Longest SSE line accepted from a provider.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Reassembles lines from arbitrarily split network reads.
///
/// Works on bytes so that a multi-byte UTF-8 character split across two
/// reads is decoded only once both halves have arrived.
#[derive(Debug, Default)]
struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Terminate a trailing line that arrived without a newline.
    fn finish(&mut self) {
        if !self.buf.is_empty() && self.buf.last() != Some(&b'\n') {
            self.buf.push(b'\n');
        }
    }

    fn next_line(&mut self) -> Option<Result<String, ProviderError>> {
        let pos = match self.buf.iter().position(|&b| b == b'\n') {
            Some(pos) if pos <= MAX_LINE_BYTES => pos,
            Some(pos) => {
                self.buf.drain(..=pos);
                return Some(Err(line_too_long()));
            }
            None if self.buf.len() <= MAX_LINE_BYTES => return None,
            None => {
                self.buf.clear();
                return Some(Err(line_too_long()));
            }
        };
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(
            String::from_utf8(line)
                .map_err(|e| ProviderError::malformed(format!("invalid UTF-8 in stream: {e}"))),
        )
    }
}

fn line_too_long() -> ProviderError {
    ProviderError::malformed(format!("stream line longer than {MAX_LINE_BYTES} bytes"))
}

struct StreamState {
    body: BoxStream<'static, reqwest::Result<Vec<u8>>>,
    lines: LineBuffer,
    decoder: StreamDecoder,
    idle_timeout: Duration,
    eof: bool,
    finished: bool,
}

impl StreamState {
    /// Pull the next non-empty text delta.  `None` ends the stream; an
    /// error is always the last item.
    async fn next_delta(&mut self) -> Option<Result<String, ProviderError>> {
        if self.finished {
            return None;
        }

        loop {
            while let Some(line) = self.lines.next_line() {
                let event = line.and_then(|l| self.decoder.feed_line(&l));
                match event {
                    Ok(Some(StreamEvent::TextDelta(text))) if !text.is_empty() => {
                        return Some(Ok(text));
                    }
                    Ok(Some(StreamEvent::Done)) => {
                        self.finished = true;
                        return None;
                    }
                    Ok(Some(StreamEvent::Started { model })) => {
                        tracing::debug!(model = %model, "stream started");
                    }
                    Ok(Some(StreamEvent::Finished { stop_reason })) => {
                        tracing::debug!(stop_reason = ?stop_reason, "stream finished");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        self.finished = true;
                        return Some(Err(e));
                    }
                }
            }

            if self.eof {
                self.finished = true;
                return None;
            }

            match tokio::time::timeout(self.idle_timeout, self.body.next()).await {
                Ok(Some(Ok(bytes))) => self.lines.push(&bytes),
                Ok(Some(Err(e))) => {
                    self.finished = true;
                    return Some(Err(ProviderError::upstream(format!("stream read error: {e}"))));
                }
                Ok(None) => {
                    self.eof = true;
                    self.lines.finish();
                }
                Err(_) => {
                    self.finished = true;
                    return Some(Err(ProviderError::timeout(format!(
                        "stream stalled for {:?}",
                        self.idle_timeout
                    ))));
                }
            }
        }
    }
}

// ===========================================================================
// Format conversion (free functions)
// ===========================================================================

/// Split the system messages out (Anthropic expects them as a top-level
/// field) and convert the rest to the Anthropic wire format.
fn messages_to_anthropic(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system: Option<String> = None;
    let mut wire = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::System => append_system(&mut system, &msg.content),
            Role::User => wire.push(json!({ "role": "user", "content": msg.content })),
            Role::Assistant => wire.push(json!({ "role": "assistant", "content": msg.content })),
        }
    }
    (system, wire)
}

/// Convert messages to the OpenAI Chat Completions wire format, where the
/// system prompt stays in the `messages` array.
pub fn messages_to_openai(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            json!({ "role": role, "content": m.content })
        })
        .collect()
}

/// Convert messages to Gemini `contents`; the assistant role is `model`.
fn messages_to_gemini(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system: Option<String> = None;
    let mut contents = Vec::with_capacity(messages.len());

    for msg in messages {
        let role = match msg.role {
            Role::System => {
                append_system(&mut system, &msg.content);
                continue;
            }
            Role::User => "user",
            Role::Assistant => "model",
        };
        contents.push(json!({ "role": role, "parts": [{ "text": msg.content }] }));
    }
    (system, contents)
}

fn append_system(system: &mut Option<String>, content: &str) {
    match system {
        Some(existing) => {
            existing.push('\n');
            existing.push_str(content);
        }
        None => *system = Some(content.to_owned()),
    }
}

/// Parse a non-streaming Anthropic Messages API response.
fn parse_anthropic_response(v: &Value) -> Result<String, ProviderError> {
    let content = v["content"]
        .as_array()
        .ok_or_else(|| ProviderError::malformed("missing `content` array in response"))?;

    Ok(content
        .iter()
        .filter(|block| block["type"].as_str() == Some("text"))
        .filter_map(|block| block["text"].as_str())
        .collect())
}

/// Parse a non-streaming OpenAI Chat Completions response.
pub fn parse_openai_response(v: &Value) -> Result<String, ProviderError> {
    let message = &v["choices"][0]["message"];
    if message.is_null() {
        return Err(ProviderError::malformed("missing `choices[0].message` in response"));
    }
    Ok(message["content"].as_str().unwrap_or_default().to_owned())
}

/// Parse a non-streaming Gemini `generateContent` response.
fn parse_gemini_response(v: &Value) -> Result<String, ProviderError> {
    if let Some(reason) = v["promptFeedback"]["blockReason"].as_str() {
        return Err(ProviderError::upstream(format!("prompt blocked: {reason}")));
    }
    let candidate = &v["candidates"][0];
    if candidate.is_null() {
        return Err(ProviderError::malformed("missing `candidates` in response"));
    }
    Ok(candidate_text(candidate))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
