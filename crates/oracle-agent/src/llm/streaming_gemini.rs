//! SSE stream decoder for the Gemini `streamGenerateContent?alt=sse` API.
//!
//! Every `data:` line carries a complete `GenerateContentResponse` whose
//! `candidates[0].content.parts[*].text` holds the next slice of output.
//! There is no terminator sentinel; the stream ends when the HTTP body ends.

use serde_json::Value;

use crate::error::ProviderError;
use crate::llm::streaming::strip_field;
use crate::llm::types::StreamEvent;

/// Decodes Gemini SSE lines into [`StreamEvent`] values.
#[derive(Debug, Default)]
pub struct GeminiStreamDecoder;

impl GeminiStreamDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Feed a single SSE line.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<StreamEvent>, ProviderError> {
        let line = line.trim_end();
        if line.is_empty() || line.starts_with(':') {
            return Ok(None);
        }
        let Some(data) = strip_field(line, "data") else {
            return Ok(None);
        };

        let v: Value = serde_json::from_str(data.trim()).map_err(|e| {
            ProviderError::malformed(format!("invalid JSON in Gemini SSE data: {e}"))
        })?;

        if let Some(error) = v.get("error").filter(|e| !e.is_null()) {
            let message = error["message"].as_str().unwrap_or("stream error").to_owned();
            return match error["code"].as_u64() {
                Some(401 | 403) => Err(ProviderError::auth(message)),
                Some(429) => Err(ProviderError::rate_limited(message)),
                _ => Err(ProviderError::upstream(message)),
            };
        }

        let candidate = &v["candidates"][0];
        let text = candidate_text(candidate);
        if !text.is_empty() {
            return Ok(Some(StreamEvent::TextDelta(text)));
        }

        if let Some(reason) = candidate["finishReason"].as_str() {
            return Ok(Some(StreamEvent::Finished {
                stop_reason: Some(reason.to_owned()),
            }));
        }

        Ok(None)
    }
}

/// Concatenate all text parts of a Gemini candidate.
pub(crate) fn candidate_text(candidate: &Value) -> String {
    candidate["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default()
}
