//! Direct HTTP transport for OpenAI-compatible inference servers.
//! llama.cpp's `llama-server`, vLLM and friends all expose the same
//! `/v1/chat/completions` shape, so a single implementation covers them.

use crate::config::DirectConfig;
use crate::error::BridgeError;
use crate::tools::maze_game_tools;
use crate::transport::{
    sanitize_api_error, FunctionCall, InferenceRequest, InferenceTransport, Reply,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const TRANSPORT_NAME: &str = "direct";

pub struct DirectTransport {
    server_url: String,
    api_key: Option<String>,
    model: String,
    request_timeout: Duration,
    client: Client,
}

impl DirectTransport {
    pub fn new(config: &DirectConfig) -> Self {
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        Self {
            server_url: config.server_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            request_timeout,
            client: Client::builder()
                .timeout(request_timeout)
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }

    /// Build the full chat completions URL, detecting whether the configured
    /// server URL already includes the endpoint path. Local llama.cpp servers
    /// are often configured with the bare host, hosted gateways with the
    /// full endpoint.
    fn chat_completions_url(&self) -> String {
        let has_full_endpoint = reqwest::Url::parse(&self.server_url)
            .map(|url| {
                url.path()
                    .trim_end_matches('/')
                    .ends_with("/chat/completions")
            })
            .unwrap_or_else(|_| {
                self.server_url
                    .trim_end_matches('/')
                    .ends_with("/chat/completions")
            });

        if has_full_endpoint {
            self.server_url.clone()
        } else {
            format!("{}/v1/chat/completions", self.server_url)
        }
    }

    fn apply_auth_header(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.header("Authorization", format!("Bearer {key}")),
            None => req,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    function: Option<Function>,
}

#[derive(Debug, Deserialize)]
struct Function {
    name: Option<String>,
    /// OpenAI serializes tool arguments as a JSON-encoded string.
    arguments: Option<String>,
}

fn extract_function_calls(tool_calls: Vec<ToolCall>) -> Vec<FunctionCall> {
    tool_calls
        .into_iter()
        .filter_map(|tc| {
            let function = tc.function?;
            let name = function.name?;
            let raw = function.arguments.unwrap_or_else(|| "{}".to_string());
            let arguments = serde_json::from_str(&raw).unwrap_or_else(|err| {
                tracing::warn!("unparseable tool arguments for {name}: {err}");
                serde_json::json!({})
            });
            Some(FunctionCall { name, arguments })
        })
        .collect()
}

#[async_trait]
impl InferenceTransport for DirectTransport {
    fn name(&self) -> &'static str {
        TRANSPORT_NAME
    }

    async fn complete(&self, request: InferenceRequest<'_>) -> Result<Reply, BridgeError> {
        let messages: Vec<Message> = request
            .dialog
            .iter()
            .map(|turn| Message {
                role: turn.role.as_str().to_string(),
                content: turn.content.clone(),
            })
            .collect();

        let body = ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: request.params.temperature,
            top_p: request.params.top_p,
            max_tokens: request.params.max_tokens,
            tools: request.use_tools.then(maze_game_tools),
        };

        let url = self.chat_completions_url();
        tracing::debug!(
            session_id = request.session_id,
            turns = request.dialog.len(),
            use_tools = request.use_tools,
            "sending chat completion to {url}"
        );

        let response = self
            .apply_auth_header(self.client.post(&url).json(&body))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    BridgeError::InferenceTimeout {
                        transport: TRANSPORT_NAME,
                        elapsed_secs: self.request_timeout.as_secs(),
                    }
                } else {
                    BridgeError::InferenceUnavailable {
                        transport: TRANSPORT_NAME,
                        detail: sanitize_api_error(&err.to_string()),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(BridgeError::InferenceUnavailable {
                transport: TRANSPORT_NAME,
                detail: format!("server returned {status}: {}", sanitize_api_error(&text)),
            });
        }

        let chat_response: ApiChatResponse =
            response.json().await.map_err(|err| BridgeError::MalformedReply {
                transport: TRANSPORT_NAME,
                detail: err.to_string(),
            })?;

        let Some(choice) = chat_response.choices.into_iter().next() else {
            return Err(BridgeError::MalformedReply {
                transport: TRANSPORT_NAME,
                detail: "response contained no choices".to_string(),
            });
        };

        Ok(Reply {
            content: choice.message.content,
            function_calls: choice
                .message
                .tool_calls
                .map(extract_function_calls)
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_transport(url: &str) -> DirectTransport {
        DirectTransport::new(&DirectConfig {
            server_url: url.to_string(),
            api_key: None,
            model: "qwen2.5-7b-instruct".to_string(),
            request_timeout_secs: 60,
        })
    }

    #[test]
    fn strips_trailing_slash() {
        let t = make_transport("http://localhost:8080/");
        assert_eq!(t.server_url, "http://localhost:8080");
    }

    #[test]
    fn chat_completions_url_bare_host() {
        let t = make_transport("http://localhost:8080");
        assert_eq!(
            t.chat_completions_url(),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn chat_completions_url_full_endpoint() {
        let t = make_transport("http://gateway.internal/api/v2/chat/completions");
        assert_eq!(
            t.chat_completions_url(),
            "http://gateway.internal/api/v2/chat/completions"
        );
    }

    #[test]
    fn chat_completions_url_requires_exact_suffix_match() {
        let t = make_transport("http://gateway.internal/chat/completions-proxy");
        assert_eq!(
            t.chat_completions_url(),
            "http://gateway.internal/chat/completions-proxy/v1/chat/completions"
        );
    }

    #[test]
    fn request_serializes_without_tools_field_when_absent() {
        let body = ChatRequest {
            model: "m".to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: "hello".to_string(),
            }],
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 256,
            tools: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("tools"));
        assert!(json.contains("\"top_p\":0.9"));
        assert!(json.contains("\"max_tokens\":256"));
    }

    #[test]
    fn request_serializes_tool_schema_when_present() {
        let body = ChatRequest {
            model: "m".to_string(),
            messages: vec![],
            temperature: 0.7,
            top_p: 0.9,
            max_tokens: 256,
            tools: Some(maze_game_tools()),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(json.contains("break_wall"));
        assert!(json.contains("teleport_player"));
    }

    #[test]
    fn response_with_content_deserializes() {
        let json = r#"{"choices":[{"message":{"content":"Move right toward the gap."}}]}"#;
        let resp: ApiChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            resp.choices[0].message.content.as_deref(),
            Some("Move right toward the gap.")
        );
    }

    #[test]
    fn tool_call_arguments_parse_from_json_string() {
        let json = r#"{"choices":[{"message":{"content":null,"tool_calls":[{"id":"call_1","type":"function","function":{"name":"break_wall","arguments":"{\"x\":3,\"y\":1}"}}]}}]}"#;
        let resp: ApiChatResponse = serde_json::from_str(json).unwrap();
        let calls = extract_function_calls(
            resp.choices
                .into_iter()
                .next()
                .unwrap()
                .message
                .tool_calls
                .unwrap(),
        );
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "break_wall");
        assert_eq!(calls[0].arguments["x"], 3);
        assert_eq!(calls[0].arguments["y"], 1);
    }

    #[test]
    fn malformed_tool_arguments_become_empty_object() {
        let calls = extract_function_calls(vec![ToolCall {
            function: Some(Function {
                name: Some("speed_boost".to_string()),
                arguments: Some("not json".to_string()),
            }),
        }]);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments, serde_json::json!({}));
    }

    #[test]
    fn tool_call_without_name_is_dropped() {
        let calls = extract_function_calls(vec![ToolCall {
            function: Some(Function {
                name: None,
                arguments: None,
            }),
        }]);
        assert!(calls.is_empty());
    }
}
