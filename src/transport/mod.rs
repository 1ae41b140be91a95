//! Transport subsystem for reaching the inference server.
//!
//! Two backends implement the [`InferenceTransport`] trait: [`direct`] speaks
//! the OpenAI-compatible chat completions API over HTTP, and [`broker`]
//! publishes requests to an MQTT broker and waits for a correlated reply.
//! Callers never see which one is active; the factory [`create_transport`]
//! picks the backend from config at startup.

pub mod broker;
pub mod direct;

pub use broker::BrokerTransport;
pub use direct::DirectTransport;

use crate::config::{Config, TransportKind};
use crate::error::BridgeError;
use crate::store::Turn;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const MAX_API_ERROR_CHARS: usize = 200;

/// Sampling parameters forwarded to the inference server on every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f64,
    pub top_p: f64,
    pub max_tokens: u32,
}

/// One inference call: the full dialog window plus per-caller options.
#[derive(Debug)]
pub struct InferenceRequest<'a> {
    pub session_id: &'a str,
    pub dialog: &'a [Turn],
    pub params: &'a GenerationParams,
    /// Attach the maze tool schema so the model may request game effects.
    pub use_tools: bool,
}

/// A tool invocation requested by the model, with arguments already
/// parsed into a JSON object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// What the inference server produced for one request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reply {
    /// Natural-language text, absent when the model only issued tool calls.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub function_calls: Vec<FunctionCall>,
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            function_calls: Vec::new(),
        }
    }

    /// The displayable text of this reply, empty when the model sent none.
    pub fn content_or_empty(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }
}

/// A backend capable of running one chat completion for a session dialog.
#[async_trait]
pub trait InferenceTransport: Send + Sync {
    /// Short backend name used in logs and error messages.
    fn name(&self) -> &'static str;

    async fn complete(&self, request: InferenceRequest<'_>) -> Result<Reply, BridgeError>;
}

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn token_end(input: &str, from: usize) -> usize {
    let mut end = from;
    for (i, c) in input[from..].char_indices() {
        if is_secret_char(c) {
            end = from + i + c.len_utf8();
        } else {
            break;
        }
    }
    end
}

/// Scrub known secret-like token prefixes from upstream error strings.
pub fn scrub_secret_patterns(input: &str) -> String {
    const PREFIXES: [&str; 2] = ["sk-", "Bearer "];

    let mut scrubbed = input.to_string();

    for prefix in PREFIXES {
        let mut search_from = 0;
        loop {
            let Some(rel) = scrubbed[search_from..].find(prefix) else {
                break;
            };

            let start = search_from + rel;
            let content_start = start + prefix.len();
            let end = token_end(&scrubbed, content_start);

            if end == content_start {
                search_from = content_start;
                continue;
            }

            scrubbed.replace_range(start..end, "[REDACTED]");
            search_from = start + "[REDACTED]".len();
        }
    }

    scrubbed
}

/// Sanitize upstream error text by scrubbing secrets and truncating length.
pub fn sanitize_api_error(input: &str) -> String {
    let scrubbed = scrub_secret_patterns(input);

    if scrubbed.chars().count() <= MAX_API_ERROR_CHARS {
        return scrubbed;
    }

    let mut end = MAX_API_ERROR_CHARS;
    while end > 0 && !scrubbed.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}...", &scrubbed[..end])
}

/// Factory: build the configured transport. Called once at startup; the
/// dispatcher holds the result behind the trait for the process lifetime.
pub fn create_transport(config: &Config) -> anyhow::Result<Arc<dyn InferenceTransport>> {
    match config.transport.kind {
        TransportKind::Direct => Ok(Arc::new(DirectTransport::new(&config.direct))),
        TransportKind::Broker => Ok(Arc::new(BrokerTransport::connect(&config.broker))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_text_constructor() {
        let reply = Reply::text("go right");
        assert_eq!(reply.content_or_empty(), "go right");
        assert!(reply.function_calls.is_empty());
    }

    #[test]
    fn reply_without_content_is_empty_string() {
        let reply = Reply::default();
        assert_eq!(reply.content_or_empty(), "");
    }

    #[test]
    fn reply_deserializes_broker_shape() {
        let json = r#"{"hint":"break the wall","function_calls":[{"name":"break_wall","arguments":{"x":3,"y":1}}]}"#;
        // Broker payloads use "hint" for the text field; remap before parsing.
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        let reply = Reply {
            content: value["hint"].as_str().map(String::from),
            function_calls: serde_json::from_value(value["function_calls"].clone()).unwrap(),
        };
        assert_eq!(reply.content_or_empty(), "break the wall");
        assert_eq!(reply.function_calls[0].name, "break_wall");
        assert_eq!(reply.function_calls[0].arguments["x"], 3);
    }

    #[test]
    fn function_call_defaults_missing_arguments() {
        let json = r#"{"name":"reveal_map"}"#;
        let call: FunctionCall = serde_json::from_str(json).unwrap();
        assert_eq!(call.name, "reveal_map");
        assert!(call.arguments.is_null());
    }

    #[test]
    fn sanitize_scrubs_sk_prefix() {
        let input = "request failed: sk-1234567890abcdef";
        let out = sanitize_api_error(input);
        assert!(!out.contains("sk-1234567890abcdef"));
        assert!(out.contains("[REDACTED]"));
    }

    #[test]
    fn sanitize_truncates_long_error() {
        let long = "a".repeat(400);
        let result = sanitize_api_error(&long);
        assert!(result.len() <= 203);
        assert!(result.ends_with("..."));
    }

    #[test]
    fn sanitize_no_secret_no_change() {
        let input = "simple upstream timeout";
        let result = sanitize_api_error(input);
        assert_eq!(result, input);
    }
}
