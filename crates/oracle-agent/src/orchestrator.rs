//! Fan-out / fan-in orchestration.
//!
//! For every [`Query`] the orchestrator invokes every registered tool
//! concurrently, waits for all of them (a join, not a race), hands the
//! results to the [`Synthesizer`] in configuration order and exposes the
//! synthesized answer as a lazy stream of [`ResponseChunk`]s.
//!
//! Nothing runs until the returned stream is first polled.  Dropping the
//! stream cancels the query: the task set owning the provider calls is
//! dropped with it, which aborts every outstanding call.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{AgentError, ProviderError};
use crate::synthesis::{SynthesisInput, Synthesizer};
use crate::tools::{Tool, ToolInvocation, ToolRegistry, ToolResult};

// ---------------------------------------------------------------------------
// Query / chunk types
// ---------------------------------------------------------------------------

/// One user question, scoped to one orchestration cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub content: String,
}

impl Query {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// One ordered fragment of the synthesized answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseChunk {
    pub data: String,
}

/// The answer to one query.  Finite, and ends right after the first error.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ResponseChunk, AgentError>> + Send>>;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Retry and concurrency policy for provider calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Maximum number of retry attempts per tool (0 = no retries).
    pub max_retries: u32,

    /// Initial delay between retries.
    #[serde(with = "millis")]
    pub initial_retry_delay: Duration,

    /// Multiplier applied to the delay after each retry (exponential backoff).
    pub retry_backoff_factor: f64,

    /// Maximum delay between retries (caps the backoff).
    #[serde(with = "millis")]
    pub max_retry_delay: Duration,

    /// Upper bound on provider calls running at once for one query.
    /// `None` runs every tool at once.
    pub max_concurrent_calls: Option<usize>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_retry_delay: Duration::from_millis(500),
            retry_backoff_factor: 2.0,
            max_retry_delay: Duration::from_secs(10),
            max_concurrent_calls: None,
        }
    }
}

impl OrchestratorConfig {
    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(
            (delay.as_secs_f64() * self.retry_backoff_factor)
                .min(self.max_retry_delay.as_secs_f64()),
        )
        .unwrap_or(self.max_retry_delay)
    }
}

/// Durations as integer milliseconds in config files.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Shared, immutable orchestration agent.  All per-query state lives in the
/// future behind the stream returned by [`Orchestrator::run`].
pub struct Orchestrator {
    tools: Arc<ToolRegistry>,
    synthesizer: Arc<dyn Synthesizer>,
    config: OrchestratorConfig,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("tools", &self.tools)
            .field("synthesis_model", &self.synthesizer.model())
            .field("config", &self.config)
            .finish()
    }
}

impl Orchestrator {
    pub fn new(
        tools: ToolRegistry,
        synthesizer: Arc<dyn Synthesizer>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            tools: Arc::new(tools),
            synthesizer,
            config,
        }
    }

    /// The registered tools, in configuration order.
    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Model used for synthesis.
    pub fn synthesis_model(&self) -> &str {
        self.synthesizer.model()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Invoke every tool for `query` and wait for all of them.
    ///
    /// Always returns exactly one result per tool, in configuration order.
    pub async fn gather(&self, query: &Query) -> Vec<ToolResult> {
        gather_results(&self.tools, query, &self.config).await
    }

    /// Answer `query` as a lazy chunk stream.
    ///
    /// Synthesis failures (at start or mid-stream) surface as a single
    /// [`AgentError::SynthesisFailed`] item, after which the stream ends.
    pub fn run(&self, query: Query) -> ChunkStream {
        let tools = Arc::clone(&self.tools);
        let synthesizer = Arc::clone(&self.synthesizer);
        let config = self.config.clone();

        let start = async move {
            let results = gather_results(&tools, &query, &config).await;
            let input = SynthesisInput::new(query.content, results);
            let text = synthesizer.stream(&input).await.map_err(synthesis_failed)?;
            Ok::<_, AgentError>(
                text.map(|delta| delta.map(|data| ResponseChunk { data }).map_err(synthesis_failed)),
            )
        };

        let chunks: ChunkStream = Box::pin(
            stream::once(start)
                .try_flatten()
                .try_filter(|chunk| futures::future::ready(!chunk.data.is_empty())),
        );

        Box::pin(stream::unfold(Some(chunks), |state| async move {
            let mut chunks = state?;
            let item = chunks.next().await?;
            let next = if item.is_err() { None } else { Some(chunks) };
            Some((item, next))
        }))
    }
}

fn synthesis_failed(e: ProviderError) -> AgentError {
    warn!(error = %e, "synthesis failed");
    AgentError::SynthesisFailed {
        reason: e.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

async fn gather_results(
    tools: &ToolRegistry,
    query: &Query,
    config: &OrchestratorConfig,
) -> Vec<ToolResult> {
    let limiter = config
        .max_concurrent_calls
        .map(|n| Arc::new(Semaphore::new(n.max(1))));

    info!(
        tools = tools.len(),
        query_len = query.content.len(),
        "dispatching query to tools"
    );

    let mut set = JoinSet::new();
    let mut names = Vec::with_capacity(tools.len());

    for (index, tool) in tools.iter().enumerate() {
        let invocation = tool.invocation(query);
        names.push(tool.name.clone());

        let tool = tool.clone();
        let config = config.clone();
        let limiter = limiter.clone();
        set.spawn(async move {
            let result = invoke_with_retry(&tool, &invocation, &config, limiter.as_deref()).await;
            (index, result)
        });
    }

    let mut slots: Vec<Option<ToolResult>> = vec![None; names.len()];
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => slots[index] = Some(result),
            Err(e) => warn!(error = %e, "tool task did not complete"),
        }
    }

    // A slot left empty means its task panicked.
    slots
        .into_iter()
        .zip(names)
        .map(|(slot, name)| {
            slot.unwrap_or_else(|| {
                ToolResult::failed(name, ProviderError::upstream("provider task panicked"))
            })
        })
        .collect()
}

/// Call one tool, retrying transient failures with exponential backoff.
async fn invoke_with_retry(
    tool: &Tool,
    invocation: &ToolInvocation,
    config: &OrchestratorConfig,
    limiter: Option<&Semaphore>,
) -> ToolResult {
    let started = Instant::now();
    let mut delay = config.initial_retry_delay;
    let mut attempts = 0;

    loop {
        attempts += 1;

        let outcome = {
            let _permit = match limiter {
                Some(semaphore) => semaphore.acquire().await.ok(),
                None => None,
            };
            debug!(tool = %tool.name, attempt = attempts, "invoking tool");
            tool.call(invocation).await
        };

        match outcome {
            Ok(content) => {
                info!(
                    tool = %tool.name,
                    attempts,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "tool answered"
                );
                return ToolResult {
                    tool_name: tool.name.clone(),
                    outcome: Ok(content),
                    attempts,
                    elapsed: started.elapsed(),
                };
            }
            Err(e) if e.kind.is_retryable() && attempts <= config.max_retries => {
                warn!(
                    tool = %tool.name,
                    attempt = attempts,
                    error = %e,
                    delay = ?delay,
                    "tool call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = config.next_delay(delay);
            }
            Err(e) => {
                warn!(tool = %tool.name, attempts, error = %e, "tool call failed");
                return ToolResult {
                    tool_name: tool.name.clone(),
                    outcome: Err(e),
                    attempts,
                    elapsed: started.elapsed(),
                };
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
