//! Fan-out / fan-in question answering across several LLM providers.
//!
//! A [`Query`] is sent to every configured [`Tool`] at once; each tool wraps
//! one remote model.  Once every tool has answered (or failed), a synthesis
//! model compares the answers and its response is streamed back as
//! [`ResponseChunk`]s.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!   Query ──────> │ Orchestrator │ ──────> ChunkStream
//!                 └──────┬───────┘
//!          ┌─────────────┼─────────────┐        (join)
//!     ┌────┴────┐   ┌────┴────┐   ┌────┴────┐
//!     │  Tool   │   │  Tool   │   │  Tool   │ ─┐
//!     │ Claude  │   │   GPT   │   │ Gemini  │  │ results in config order
//!     └─────────┘   └─────────┘   └─────────┘  │
//!                                  ┌───────────┴─┐
//!                                  │ Synthesizer │ (streaming)
//!                                  └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`llm`] -- Provider wire protocols and SSE streaming.
//! - [`provider`] -- The [`Provider`] seam and its LLM-backed implementation.
//! - [`tools`] -- Tool adapters and the ordered registry.
//! - [`synthesis`] -- Prompt rendering and the streaming synthesizer.
//! - [`orchestrator`] -- Concurrent dispatch, retries and the chunk stream.
//! - [`config`] -- TOML configuration and credential resolution.
//! - [`error`] -- Provider and agent error types.

pub mod config;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod provider;
pub mod synthesis;
pub mod tools;

pub use config::{OracleConfig, ProviderSettings, SynthesisSettings};
pub use error::{AgentError, ErrorKind, ProviderError, Result};
pub use llm::{ChatRequest, LlmClient, LlmClientConfig, LlmProvider, Message, Role, TextStream};
pub use orchestrator::{ChunkStream, Orchestrator, OrchestratorConfig, Query, ResponseChunk};
pub use provider::{ModelProvider, Provider};
pub use synthesis::{LlmSynthesizer, SynthesisInput, Synthesizer};
pub use tools::{Tool, ToolDefinition, ToolInvocation, ToolRegistry, ToolResult};
