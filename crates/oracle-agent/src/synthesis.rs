//! Synthesis of tool answers into one streamed response.
//!
//! [`SynthesisInput`] renders every tool result for a query into a single
//! prompt.  Rendering is a pure function of the query and the results in
//! configuration order, so identical provider outputs always produce a
//! byte-identical prompt regardless of which provider finished first.

use std::fmt::Write as _;

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::llm::{ChatRequest, LlmClient, TextStream};
use crate::tools::ToolResult;

/// System prompt for the synthesis model unless the configuration
/// overrides it.
pub const DEFAULT_SYNTHESIS_SYSTEM_PROMPT: &str = "\
You compare answers to one question collected from several independent sources \
and write a single nuanced response in markdown.

Structure the response as follows.

1. Reasoning: what each source was asked and what you looked for in its answer.
2. Aggregated answer: the essential information from every source in plain \
language, with technical terms explained, followed by a bullet list of the key points.
3. Source assessment: a table with one column per source covering strong points, \
weak points, nuances unique to that source, a certainty score from 1 to 10 with \
reasons, and the references the source gave.
4. Agreements and disagreements: a two-column table.

Use bullet points inside table cells. Be explicit about anything you are unsure of.";

const ALL_UNAVAILABLE_NOTE: &str = "\
None of the sources could be reached for this question. State that clearly at \
the start of your response, then give your own best answer and mark it as unverified.";

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Everything synthesis sees for one query.
#[derive(Debug, Clone)]
pub struct SynthesisInput {
    /// The original query text.
    pub query: String,
    /// One result per configured tool, in configuration order.
    pub results: Vec<ToolResult>,
}

impl SynthesisInput {
    pub fn new(query: impl Into<String>, results: Vec<ToolResult>) -> Self {
        Self {
            query: query.into(),
            results,
        }
    }

    /// Whether every tool failed.
    pub fn all_unavailable(&self) -> bool {
        self.results.iter().all(|r| !r.is_success())
    }

    /// Render the user prompt for the synthesis model.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(
            self.query.len() + self.results.iter().map(result_len).sum::<usize>() + 256,
        );

        let _ = writeln!(out, "Question:\n{}\n", self.query);
        out.push_str("Source answers:\n");

        for result in &self.results {
            let _ = writeln!(out, "\n### {}", result.tool_name);
            match &result.outcome {
                Ok(content) => {
                    let _ = writeln!(out, "{}", content.trim_end());
                }
                Err(e) => {
                    let _ = writeln!(out, "[unavailable: {e}]");
                }
            }
        }

        if self.all_unavailable() {
            let _ = write!(out, "\n{ALL_UNAVAILABLE_NOTE}\n");
        }
        out
    }
}

fn result_len(r: &ToolResult) -> usize {
    r.content().map_or(64, str::len) + r.tool_name.len() + 8
}

// ---------------------------------------------------------------------------
// Synthesizer
// ---------------------------------------------------------------------------

/// Turns a [`SynthesisInput`] into a stream of answer text.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Model identifier reported by the status endpoint.
    fn model(&self) -> &str;

    /// Start streaming the synthesized answer.
    async fn stream(&self, input: &SynthesisInput) -> Result<TextStream, ProviderError>;
}

/// A [`Synthesizer`] backed by a streaming [`LlmClient`].
#[derive(Debug, Clone)]
pub struct LlmSynthesizer {
    client: LlmClient,
    model: String,
    system_prompt: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl LlmSynthesizer {
    pub fn new(client: LlmClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            system_prompt: DEFAULT_SYNTHESIS_SYSTEM_PROMPT.to_owned(),
            temperature: None,
            max_tokens: None,
        }
    }

    /// Builder: replace the system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Builder: set sampling parameters.
    pub fn with_sampling(mut self, temperature: Option<f32>, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    /// The request sent for `input`.
    pub fn request_for(&self, input: &SynthesisInput) -> ChatRequest {
        ChatRequest::single_turn(&self.system_prompt, input.render())
            .with_model(&self.model)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
    }
}

#[async_trait]
impl Synthesizer for LlmSynthesizer {
    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(&self, input: &SynthesisInput) -> Result<TextStream, ProviderError> {
        tracing::info!(
            model = %self.model,
            sources = input.results.len(),
            succeeded = input.results.iter().filter(|r| r.is_success()).count(),
            "starting synthesis"
        );
        self.client.stream(&self.request_for(input)).await
    }
}
