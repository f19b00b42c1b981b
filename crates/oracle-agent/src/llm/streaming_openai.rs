//! SSE stream decoder for the OpenAI Chat Completions API.
//!
//! The OpenAI streaming format sends `data:` lines with JSON payloads
//! containing `choices[].delta` objects and terminates with a `data: [DONE]`
//! sentinel.  OpenAI-compatible servers (Ollama, vLLM, Together) follow the
//! same shape.

use serde_json::Value;

use crate::error::ProviderError;
use crate::llm::streaming::strip_field;
use crate::llm::types::StreamEvent;

/// Decodes OpenAI SSE lines into [`StreamEvent`] values.
#[derive(Debug, Default)]
pub struct OpenAiStreamDecoder {
    /// Whether the first chunk (which carries the model name) has been seen.
    started: bool,
}

impl OpenAiStreamDecoder {
    /// Create a new decoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a single SSE line.
    ///
    /// A chunk may carry both the model name and a text delta; the text
    /// delta wins because it is what the caller needs to forward.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<StreamEvent>, ProviderError> {
        let line = line.trim_end();

        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }

        // `event:` lines and other SSE fields carry nothing for us.
        let Some(data) = strip_field(line, "data") else {
            return Ok(None);
        };
        let data = data.trim();

        if data == "[DONE]" {
            return Ok(Some(StreamEvent::Done));
        }

        let v: Value = serde_json::from_str(data).map_err(|e| {
            ProviderError::malformed(format!("invalid JSON in OpenAI SSE data: {e}"))
        })?;

        if let Some(error) = v.get("error").filter(|e| !e.is_null()) {
            let message = error["message"].as_str().unwrap_or("stream error");
            return Err(ProviderError::upstream(message.to_owned()));
        }

        let choice = &v["choices"][0];

        if let Some(content) = choice["delta"]["content"].as_str() {
            self.started = true;
            return Ok(Some(StreamEvent::TextDelta(content.to_owned())));
        }

        if let Some(reason) = choice["finish_reason"].as_str() {
            return Ok(Some(StreamEvent::Finished {
                stop_reason: Some(reason.to_owned()),
            }));
        }

        if !self.started {
            self.started = true;
            if let Some(model) = v["model"].as_str() {
                return Ok(Some(StreamEvent::Started {
                    model: model.to_owned(),
                }));
            }
        }

        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
