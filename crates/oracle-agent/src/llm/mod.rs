//! LLM integration layer.
//!
//! - [`types`] -- Provider-neutral messages, requests and stream events.
//! - [`client`] -- HTTP client for the Anthropic, OpenAI and Gemini APIs.
//! - [`streaming`] -- SSE parser for Anthropic incremental responses.
//! - [`streaming_openai`] -- SSE parser for OpenAI incremental responses.
//! - [`streaming_gemini`] -- SSE parser for Gemini incremental responses.

pub mod client;
pub mod streaming;
pub mod streaming_gemini;
pub mod streaming_openai;
pub mod types;

pub use client::{LlmClient, LlmClientConfig, LlmProvider, TextStream};
pub use types::{ChatRequest, Message, Role, StreamEvent};
