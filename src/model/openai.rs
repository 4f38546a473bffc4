//! OpenAI-compatible chat completions backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ModelBackend, ModelError, ModelReply, ToolDefinition};
use crate::chat::{ChatMessage, Role, ToolCall};
use crate::config::ModelConfig;

// ─── Wire Types ──────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    #[serde(serialize_with = "serialize_content")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

/// Emits `""` for missing content; several compatible servers reject `null`.
fn serialize_content<S: Serializer>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(value.as_deref().unwrap_or_default())
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

impl From<&ChatMessage> for WireMessage {
    fn from(message: &ChatMessage) -> Self {
        let role = match message.role {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };

        let tool_calls = (!message.tool_calls.is_empty()).then(|| {
            message
                .tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    kind: "function",
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect()
        });

        Self {
            role,
            content: message.content.clone(),
            tool_calls,
            tool_call_id: message.tool_call_id.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
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
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    #[serde(default)]
    id: Option<String>,
    function: ResponseFunctionCall,
}

#[derive(Debug, Deserialize)]
struct ResponseFunctionCall {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// Arguments usually arrive as a JSON string. Anything unparseable is kept
/// under `raw` so the server can report a meaningful error.
fn parse_arguments(arguments: Value) -> Value {
    match arguments {
        Value::String(s) if s.trim().is_empty() => json!({}),
        Value::String(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
            warn!(error = %e, "Tool call arguments are not valid JSON");
            json!({ "raw": s })
        }),
        Value::Null => json!({}),
        other => other,
    }
}

fn parse_response(body: &str) -> Result<ModelReply, ModelError> {
    let response: ChatCompletionResponse =
        serde_json::from_str(body).map_err(|e| ModelError::InvalidResponse {
            reason: format!("malformed completion body: {e}"),
        })?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::InvalidResponse {
            reason: "completion has no choices".to_string(),
        })?;

    let content = choice.message.content.filter(|c| !c.is_empty());
    let calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|call| ToolCall {
            id: call
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple())),
            name: call.function.name,
            arguments: parse_arguments(call.function.arguments),
        })
        .collect();

    if calls.is_empty() {
        Ok(ModelReply::Final(content.unwrap_or_default()))
    } else {
        Ok(ModelReply::ToolCalls { content, calls })
    }
}

// ─── Backend ─────────────────────────────────────────────────────────────────

/// Chat completions client for OpenAI-compatible endpoints.
///
/// Transient failures (connection errors, timeouts, HTTP 429 and 5xx gateway
/// errors) are retried with exponential backoff.
#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    max_retries: u32,
    initial_backoff: Duration,
    timeout_secs: u64,
}

impl OpenAiBackend {
    /// Creates a backend, reading the API key from the configured variable.
    ///
    /// # Errors
    ///
    /// Returns `MissingCredential` if the variable is unset or empty.
    pub fn from_config(config: &ModelConfig) -> Result<Self, ModelError> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ModelError::MissingCredential {
                var: config.api_key_env.clone(),
            })?;

        Self::new(config, api_key)
    }

    /// Creates a backend with an explicit API key.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionFailed` if the HTTP client cannot be built.
    pub fn new(config: &ModelConfig, api_key: impl Into<String>) -> Result<Self, ModelError> {
        let endpoint = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ModelError::ConnectionFailed {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            http,
            endpoint,
            api_key: api_key.into(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            timeout_secs: config.request_timeout_secs,
        })
    }

    /// The model identifier sent with each request.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    async fn request_once(&self, body: &ChatCompletionRequest<'_>) -> Result<ModelReply, ModelError> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await.map_err(|e| self.transport_error(&e))?;
        parse_response(&text)
    }

    fn transport_error(&self, error: &reqwest::Error) -> ModelError {
        if error.is_timeout() {
            ModelError::Timeout {
                duration_secs: self.timeout_secs,
            }
        } else {
            ModelError::ConnectionFailed {
                endpoint: self.endpoint.clone(),
                reason: error.to_string(),
            }
        }
    }
}

#[async_trait]
impl ModelBackend for OpenAiBackend {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelReply, ModelError> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages: messages.iter().map(WireMessage::from).collect(),
            tools: (!tools.is_empty()).then_some(tools),
            tool_choice: (!tools.is_empty()).then_some("auto"),
            max_tokens: self.max_tokens,
        };

        let mut attempt = 0u32;
        loop {
            debug!(
                model = %self.model,
                messages = messages.len(),
                tools = tools.len(),
                attempt,
                "Requesting completion"
            );

            match self.request_once(&body).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retriable() && attempt < self.max_retries => {
                    let delay = self
                        .initial_backoff
                        .saturating_mul(2u32.saturating_pow(attempt));
                    warn!(
                        error = %e,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Model request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FunctionDefinition;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: &str) -> ModelConfig {
        ModelConfig {
            base_url: base_url.to_string(),
            max_retries: 2,
            initial_backoff_ms: 1,
            ..ModelConfig::default()
        }
    }

    fn final_body(text: &str) -> Value {
        json!({
            "choices": [{"message": {"role": "assistant", "content": text}}]
        })
    }

    fn echo_tool() -> ToolDefinition {
        ToolDefinition {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: "echo".to_string(),
                description: "Echo a message".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            },
        }
    }

    #[test]
    fn parse_final_answer() {
        let reply = parse_response(&final_body("Hello!").to_string()).unwrap();
        assert_eq!(reply, ModelReply::Final("Hello!".to_string()));
    }

    #[test]
    fn parse_tool_calls_in_order() {
        let body = json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [
                    {"id": "call_a", "type": "function",
                     "function": {"name": "echo", "arguments": "{\"message\":\"x\"}"}},
                    {"type": "function",
                     "function": {"name": "echo", "arguments": "not json"}}
                ]
            }}]
        });

        let ModelReply::ToolCalls { content, calls } = parse_response(&body.to_string()).unwrap()
        else {
            panic!("expected tool calls");
        };
        assert!(content.is_none());
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call_a");
        assert_eq!(calls[0].arguments, json!({"message": "x"}));
        assert!(calls[1].id.starts_with("call_"));
        assert_eq!(calls[1].arguments, json!({"raw": "not json"}));
    }

    #[test]
    fn parse_arguments_variants() {
        assert_eq!(parse_arguments(json!("")), json!({}));
        assert_eq!(parse_arguments(Value::Null), json!({}));
        assert_eq!(parse_arguments(json!({"a": 1})), json!({"a": 1}));
    }

    #[test]
    fn empty_choices_is_invalid() {
        let err = parse_response(r#"{"choices": []}"#).unwrap_err();
        assert!(matches!(err, ModelError::InvalidResponse { .. }));
    }

    #[test]
    fn tool_turns_serialise_with_call_ids() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "echo".to_string(),
            arguments: json!({"message": "x"}),
        };
        let assistant = WireMessage::from(&ChatMessage::assistant_with_calls(None, vec![call]));
        let tool = WireMessage::from(&ChatMessage::tool("call_1", "x"));

        let assistant = serde_json::to_value(&assistant).unwrap();
        assert_eq!(assistant["content"], "");
        assert_eq!(assistant["tool_calls"][0]["function"]["arguments"], "{\"message\":\"x\"}");

        let tool = serde_json::to_value(&tool).unwrap();
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "call_1");
    }

    #[tokio::test]
    async fn sends_tools_with_auto_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "gpt-4o-mini",
                "max_tokens": 1000,
                "tool_choice": "auto"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(final_body("done")))
            .expect(1)
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(&test_config(&server.uri()), "test-key").unwrap();
        let reply = backend
            .complete(&[ChatMessage::user("hi")], &[echo_tool()])
            .await
            .unwrap();
        assert_eq!(reply, ModelReply::Final("done".to_string()));
    }

    #[tokio::test]
    async fn retries_on_service_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(final_body("recovered")))
            .expect(1)
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(&test_config(&server.uri()), "test-key").unwrap();
        let reply = backend.complete(&[ChatMessage::user("hi")], &[]).await.unwrap();
        assert_eq!(reply, ModelReply::Final("recovered".to_string()));
    }

    #[tokio::test]
    async fn does_not_retry_bad_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad request"))
            .expect(1)
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(&test_config(&server.uri()), "test-key").unwrap();
        let err = backend
            .complete(&[ChatMessage::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Http { status: 400, .. }));
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(502))
            .expect(3)
            .mount(&server)
            .await;

        let backend = OpenAiBackend::new(&test_config(&server.uri()), "test-key").unwrap();
        let err = backend
            .complete(&[ChatMessage::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, ModelError::Http { status: 502, .. }));
    }

    #[test]
    fn missing_credential_is_reported() {
        let config = ModelConfig {
            api_key_env: "MCP_CHAT_CLIENT_TEST_UNSET_KEY".to_string(),
            ..ModelConfig::default()
        };
        let err = OpenAiBackend::from_config(&config).unwrap_err();
        assert!(matches!(err, ModelError::MissingCredential { ref var } if var == "MCP_CHAT_CLIENT_TEST_UNSET_KEY"));
    }
}
