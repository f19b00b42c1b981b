//! Core types for LLM interaction.
//!
//! These types model the data flowing between the agent and the model
//! providers.  They are provider-agnostic at this layer; the
//! [`super::client`] module translates them into provider-specific wire
//! formats.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// The role of a participant in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System-level instructions that shape model behavior.
    System,
    /// Input from the human user.
    User,
    /// Output from the LLM.
    Assistant,
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this message.
    pub role: Role,
    /// The textual content of the message.
    #[serde(default)]
    pub content: String,
}

impl Message {
    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Chat request
// ---------------------------------------------------------------------------

/// A full request to send to an LLM provider.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    /// The model identifier.  Empty means "use the client's default model".
    pub model: String,

    /// The conversation, system prompt first.
    pub messages: Vec<Message>,

    /// Sampling temperature (0.0 = deterministic, 1.0 = creative).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Maximum tokens the model may generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// A single-turn request: one system prompt and one user message.
    pub fn single_turn(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: String::new(),
            messages: vec![Message::system(system), Message::user(user)],
            temperature: None,
            max_tokens: None,
        }
    }

    /// Builder: pin the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Builder: set the sampling temperature.
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Builder: set the response token limit.
    pub fn with_max_tokens(mut self, max_tokens: Option<u32>) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

// ---------------------------------------------------------------------------
// Streaming events
// ---------------------------------------------------------------------------

/// Provider-neutral event decoded from one SSE line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The stream has started; carries the model that is answering.
    Started {
        /// The model reported by the provider.
        model: String,
    },

    /// An incremental fragment of the answer text.
    TextDelta(String),

    /// The provider reported why generation stopped.  More lines (usage,
    /// the terminator) may still follow.
    Finished {
        /// The stop reason (`"end_turn"`, `"stop"`, `"STOP"`, ...).
        stop_reason: Option<String>,
    },

    /// The stream has fully terminated.
    Done,

    /// A keepalive event (no payload).
    Ping,
}
