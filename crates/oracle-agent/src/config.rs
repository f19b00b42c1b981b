//! Oracle configuration.
//!
//! Everything has a default, so an empty (or absent) TOML file yields the
//! stock setup: Claude, GPT and Gemini as tools, in that order, with Claude
//! synthesizing.  API keys are never read from the file; they are resolved
//! from environment variables named per provider.
//!
//! ```toml
//! [synthesis]
//! kind = "anthropic"
//! model = "claude-3-7-sonnet-latest"
//!
//! [orchestrator]
//! max_retries = 1
//!
//! [[providers]]
//! name = "ask_local"
//! kind = "openai"
//! model = "llama3"
//! base_url = "http://localhost:11434/v1"
//! api_key_env = "LOCAL_API_KEY"
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AgentError, Result};
use crate::llm::{LlmClient, LlmClientConfig, LlmProvider};
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::provider::{DEFAULT_TOOL_SYSTEM_PROMPT, ModelProvider};
use crate::synthesis::LlmSynthesizer;
use crate::tools::{Tool, ToolRegistry};

/// Default model answering as Claude.
pub const DEFAULT_CLAUDE_MODEL: &str = "claude-3-7-sonnet-latest";
/// Default model answering as GPT.
pub const DEFAULT_GPT_MODEL: &str = "o4-mini";
/// Default model answering as Gemini.
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";

/// The environment variable holding the key for `kind` unless overridden.
pub fn default_api_key_env(kind: LlmProvider) -> &'static str {
    match kind {
        LlmProvider::Anthropic => "CLAUDE_API_KEY",
        LlmProvider::OpenAI => "GPT_API_KEY",
        LlmProvider::Gemini => "GEMINI_API_KEY",
    }
}

fn default_timeout_secs() -> u64 {
    60
}

// ---------------------------------------------------------------------------
// Provider settings
// ---------------------------------------------------------------------------

/// One tool backed by one remote model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Tool name, unique across the configuration.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Wire protocol to speak.
    pub kind: LlmProvider,
    pub model: String,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Override for the provider's public endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Deadline for one call, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Resolved at start-up; never read from or written to the file.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl ProviderSettings {
    pub fn new(name: &str, description: &str, kind: LlmProvider, model: &str) -> Self {
        Self {
            name: name.to_owned(),
            description: description.to_owned(),
            kind,
            model: model.to_owned(),
            api_key_env: None,
            base_url: None,
            timeout_secs: default_timeout_secs(),
            temperature: None,
            max_tokens: None,
            api_key: None,
        }
    }

    /// The environment variable this provider's key is read from.
    pub fn api_key_env(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| default_api_key_env(self.kind))
    }

    fn client_config(&self) -> LlmClientConfig {
        let mut config = LlmClientConfig::new(
            self.kind,
            self.api_key.clone().unwrap_or_default(),
            &self.model,
        );
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        config.request_timeout = Duration::from_secs(self.timeout_secs);
        config
    }
}

// ---------------------------------------------------------------------------
// Synthesis settings
// ---------------------------------------------------------------------------

/// The model that compares the tool answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisSettings {
    pub kind: LlmProvider,
    pub model: String,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
    /// Replaces the built-in synthesis instructions.
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Deadline for the provider to start streaming, in seconds.
    pub request_timeout_secs: u64,
    /// Longest silence tolerated mid-stream, in seconds.
    pub stream_idle_timeout_secs: u64,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            kind: LlmProvider::Anthropic,
            model: DEFAULT_CLAUDE_MODEL.to_owned(),
            api_key_env: None,
            base_url: None,
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            request_timeout_secs: 120,
            stream_idle_timeout_secs: 60,
            api_key: None,
        }
    }
}

impl SynthesisSettings {
    pub fn api_key_env(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| default_api_key_env(self.kind))
    }

    fn client_config(&self) -> LlmClientConfig {
        let mut config = LlmClientConfig::new(
            self.kind,
            self.api_key.clone().unwrap_or_default(),
            &self.model,
        );
        if let Some(url) = &self.base_url {
            config.base_url = url.clone();
        }
        config.request_timeout = Duration::from_secs(self.request_timeout_secs);
        config.stream_idle_timeout = Duration::from_secs(self.stream_idle_timeout_secs);
        config
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Complete agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Tools, in the order their answers are presented to synthesis.
    pub providers: Vec<ProviderSettings>,
    pub synthesis: SynthesisSettings,
    pub orchestrator: OrchestratorConfig,
    /// Replaces the built-in system prompt sent with every tool call.
    pub tool_system_prompt: Option<String>,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderSettings::new(
                    "ask_claude",
                    "Ask Claude with the given prompt.",
                    LlmProvider::Anthropic,
                    DEFAULT_CLAUDE_MODEL,
                ),
                ProviderSettings::new(
                    "ask_gpt",
                    "Ask GPT with the given prompt.",
                    LlmProvider::OpenAI,
                    DEFAULT_GPT_MODEL,
                ),
                ProviderSettings::new(
                    "ask_gemini",
                    "Ask Gemini with the given prompt.",
                    LlmProvider::Gemini,
                    DEFAULT_GEMINI_MODEL,
                ),
            ],
            synthesis: SynthesisSettings::default(),
            orchestrator: OrchestratorConfig::default(),
            tool_system_prompt: None,
        }
    }
}

impl OracleConfig {
    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| AgentError::ConfigError {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        let config = Self::from_toml_str(&text)?;
        info!(path = %path.display(), tools = config.providers.len(), "loaded config");
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| AgentError::ConfigError {
            reason: format!("invalid config: {e}"),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check invariants the type system cannot express.
    pub fn validate(&self) -> Result<()> {
        for (i, p) in self.providers.iter().enumerate() {
            if p.name.trim().is_empty() {
                return Err(AgentError::ConfigError {
                    reason: format!("provider #{} has an empty name", i + 1),
                });
            }
            if p.model.trim().is_empty() {
                return Err(AgentError::ConfigError {
                    reason: format!("provider {} has no model", p.name),
                });
            }
            if p.timeout_secs == 0 {
                return Err(AgentError::ConfigError {
                    reason: format!("provider {} needs a non-zero timeout", p.name),
                });
            }
            if self.providers[..i].iter().any(|q| q.name == p.name) {
                return Err(AgentError::DuplicateTool {
                    name: p.name.clone(),
                });
            }
        }
        if self.synthesis.model.trim().is_empty() {
            return Err(AgentError::ConfigError {
                reason: "synthesis model is empty".into(),
            });
        }
        let factor = self.orchestrator.retry_backoff_factor;
        if !factor.is_finite() || factor < 1.0 {
            return Err(AgentError::ConfigError {
                reason: format!("retry_backoff_factor must be at least 1.0, got {factor}"),
            });
        }
        Ok(())
    }

    /// Fill in API keys using `lookup` (an environment-variable reader).
    /// Blank values count as missing.
    pub fn resolve_credentials<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let resolve = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        for p in &mut self.providers {
            p.api_key = resolve(p.api_key_env());
            if p.api_key.is_none() {
                warn!(tool = %p.name, env = %p.api_key_env(), "no API key; tool will report auth failures");
            }
        }
        self.synthesis.api_key = resolve(self.synthesis.api_key_env());
        if self.synthesis.api_key.is_none() {
            warn!(env = %self.synthesis.api_key_env(), "no API key for the synthesis model");
        }
    }

    /// Resolve API keys from the process environment.
    pub fn resolve_credentials_from_env(&mut self) {
        self.resolve_credentials(|var| std::env::var(var).ok());
    }

    /// Build the shared orchestrator.  All clients share one connection pool.
    pub fn build_orchestrator(&self) -> Result<Orchestrator> {
        self.validate()?;

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AgentError::ConfigError {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        let system_prompt = self
            .tool_system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_TOOL_SYSTEM_PROMPT);

        let mut registry = ToolRegistry::new();
        for p in &self.providers {
            let client = LlmClient::with_http(p.client_config(), http.clone());
            let provider = ModelProvider::new(client, &p.model, Duration::from_secs(p.timeout_secs))
                .with_system_prompt(system_prompt)
                .with_sampling(p.temperature, p.max_tokens);
            registry.register(Tool::new(&p.name, &p.description, Arc::new(provider)))?;
        }

        let s = &self.synthesis;
        let mut synthesizer = LlmSynthesizer::new(
            LlmClient::with_http(s.client_config(), http),
            &s.model,
        )
        .with_sampling(s.temperature, s.max_tokens);
        if let Some(prompt) = &s.system_prompt {
            synthesizer = synthesizer.with_system_prompt(prompt);
        }

        Ok(Orchestrator::new(
            registry,
            Arc::new(synthesizer),
            self.orchestrator.clone(),
        ))
    }
}
