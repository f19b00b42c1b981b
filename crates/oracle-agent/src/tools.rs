//! Tool adapters.
//!
//! Each configured [`Provider`] is exposed to the orchestrator as a named
//! [`Tool`].  The [`ToolRegistry`] keeps tools in configuration order, which
//! is also the order their results are handed to synthesis.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{Value, json};

use crate::error::{AgentError, ProviderError, Result};
use crate::orchestrator::Query;
use crate::provider::Provider;

// ---------------------------------------------------------------------------
// Tool
// ---------------------------------------------------------------------------

/// A named, invokable wrapper around one provider.
#[derive(Clone)]
pub struct Tool {
    /// Unique tool name (e.g. `"ask_claude"`).
    pub name: String,
    /// Human-readable description of what the tool answers with.
    pub description: String,
    provider: Arc<dyn Provider>,
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("provider", &self.provider.name())
            .finish()
    }
}

impl Tool {
    /// Create a tool around `provider`.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            provider,
        }
    }

    /// The provider this tool forwards to.
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    /// Derive this tool's invocation for `query`.  The query text is passed
    /// through unchanged.
    pub fn invocation(&self, query: &Query) -> ToolInvocation {
        ToolInvocation {
            tool_name: self.name.clone(),
            provider_query: query.content.clone(),
        }
    }

    /// Run one invocation against the provider.
    pub async fn call(&self, invocation: &ToolInvocation) -> std::result::Result<String, ProviderError> {
        self.provider.invoke(&invocation.provider_query).await
    }

    /// The definition advertised for this tool.
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "prompt": {
                        "type": "string",
                        "description": "The question to put to the model."
                    }
                },
                "required": ["prompt"]
            }),
        }
    }
}

/// Schema-level description of a tool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

// ---------------------------------------------------------------------------
// Invocation & result
// ---------------------------------------------------------------------------

/// One request to one tool on behalf of one query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub tool_name: String,
    pub provider_query: String,
}

/// The outcome of a single tool invocation.
///
/// Holds either the answer or the error, never both.
#[derive(Debug, Clone)]
pub struct ToolResult {
    /// The tool that produced this result.
    pub tool_name: String,
    /// The answer text or the final provider error.
    pub outcome: std::result::Result<String, ProviderError>,
    /// Number of provider calls made (1 = first try settled it).
    pub attempts: u32,
    /// Wall-clock time spent, retries included.
    pub elapsed: Duration,
}

impl ToolResult {
    /// Build a failed result.
    pub fn failed(tool_name: impl Into<String>, error: ProviderError) -> Self {
        Self {
            tool_name: tool_name.into(),
            outcome: Err(error),
            attempts: 0,
            elapsed: Duration::ZERO,
        }
    }

    /// The answer, if the tool succeeded.
    pub fn content(&self) -> Option<&str> {
        self.outcome.as_deref().ok()
    }

    /// The error, if the tool failed.
    pub fn error(&self) -> Option<&ProviderError> {
        self.outcome.as_ref().err()
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Ordered set of tools with unique names.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool at the end.  Fails if the name is already taken.
    pub fn register(&mut self, tool: Tool) -> Result<()> {
        if self.get(&tool.name).is_some() {
            return Err(AgentError::DuplicateTool { name: tool.name });
        }
        tracing::debug!(tool = %tool.name, provider = %tool.provider.name(), "registered tool");
        self.tools.push(tool);
        Ok(())
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Tools in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions of every tool, in configuration order.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(Tool::definition).collect()
    }
}
