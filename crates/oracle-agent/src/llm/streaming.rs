//! SSE stream parser for the Anthropic Messages API.
//!
//! The Anthropic streaming format sends `event:` and `data:` lines in
//! standard SSE format.  This module turns those lines into provider-neutral
//! [`StreamEvent`] values.

use serde_json::Value;

use crate::error::ProviderError;
use crate::llm::types::StreamEvent;

/// Parses raw SSE lines from the Anthropic Messages API stream.
///
/// Keeps the most recent `event:` type because an event spans two lines
/// (`event:` followed by `data:`).
#[derive(Debug, Default)]
pub struct SseParser {
    current_event_type: Option<String>,
}

impl SseParser {
    /// Create a new parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a single line from the SSE stream.
    ///
    /// Returns `Some(event)` when a complete event has been parsed, `None` for
    /// comment lines, blank lines, the `event:` prefix line, and content we
    /// do not surface (tool-use JSON, thinking blocks).
    pub fn parse_line(&mut self, line: &str) -> Result<Option<StreamEvent>, ProviderError> {
        let line = line.trim_end();

        if line.starts_with(':') || line.is_empty() {
            return Ok(None);
        }

        if let Some(event_type) = strip_field(line, "event") {
            self.current_event_type = Some(event_type.to_owned());
            return Ok(None);
        }

        if let Some(data) = strip_field(line, "data") {
            let event_type = self
                .current_event_type
                .take()
                .unwrap_or_else(|| "unknown".into());
            return self.parse_event(&event_type, data);
        }

        tracing::trace!(line, "ignoring unrecognised SSE line");
        Ok(None)
    }

    fn parse_event(
        &self,
        event_type: &str,
        data: &str,
    ) -> Result<Option<StreamEvent>, ProviderError> {
        match event_type {
            "message_start" => {
                let v = parse_json(data)?;
                Ok(Some(StreamEvent::Started {
                    model: v["message"]["model"].as_str().unwrap_or_default().to_owned(),
                }))
            }

            "content_block_delta" => {
                let v = parse_json(data)?;
                let delta = &v["delta"];
                match delta["type"].as_str() {
                    Some("text_delta") => Ok(Some(StreamEvent::TextDelta(
                        delta["text"].as_str().unwrap_or_default().to_owned(),
                    ))),
                    other => {
                        tracing::trace!(delta_type = ?other, "skipping non-text delta");
                        Ok(None)
                    }
                }
            }

            "message_delta" => {
                let v = parse_json(data)?;
                Ok(Some(StreamEvent::Finished {
                    stop_reason: v["delta"]["stop_reason"].as_str().map(String::from),
                }))
            }

            "message_stop" => Ok(Some(StreamEvent::Done)),

            "ping" => Ok(Some(StreamEvent::Ping)),

            // Anthropic reports mid-stream failures (e.g. `overloaded_error`)
            // as a dedicated event.
            "error" => {
                let v = parse_json(data)?;
                let error_type = v["error"]["type"].as_str().unwrap_or("error");
                let message = v["error"]["message"].as_str().unwrap_or_default();
                let reason = format!("{error_type}: {message}");
                if error_type == "rate_limit_error" {
                    Err(ProviderError::rate_limited(reason))
                } else {
                    Err(ProviderError::upstream(reason))
                }
            }

            "content_block_start" | "content_block_stop" => Ok(None),

            _ => {
                if data.trim() == "[DONE]" {
                    Ok(Some(StreamEvent::Done))
                } else {
                    tracing::trace!(event_type, "ignoring unknown SSE event type");
                    Ok(None)
                }
            }
        }
    }
}

/// Strip an SSE field name from a line, tolerating the optional space after
/// the colon.
pub(crate) fn strip_field<'a>(line: &'a str, field: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(field)?.strip_prefix(':')?;
    Some(rest.strip_prefix(' ').unwrap_or(rest))
}

fn parse_json(data: &str) -> Result<Value, ProviderError> {
    serde_json::from_str(data)
        .map_err(|e| ProviderError::malformed(format!("invalid JSON in SSE data: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
