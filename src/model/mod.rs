//! Language model capability.
//!
//! The conversation loop talks to the model through [`ModelBackend`]: it hands
//! over the full history plus the current tool schema and gets back either a
//! final answer or a batch of tool calls. [`OpenAiBackend`] implements the
//! trait against any OpenAI-compatible chat completions endpoint.

mod openai;

pub use openai::OpenAiBackend;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::chat::{ChatMessage, ToolCall};

/// Tool definition in the model's function-calling format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    /// Always `"function"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// The function description.
    pub function: FunctionDefinition,
}

/// Function description within a [`ToolDefinition`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FunctionDefinition {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    pub description: String,
    /// JSON Schema of the arguments.
    pub parameters: Value,
}

/// What the model produced for one completion request.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// A final answer for the user.
    Final(String),
    /// A request to run tools before answering.
    ToolCalls {
        /// Text the model emitted alongside the calls, if any.
        content: Option<String>,
        /// Calls in the order the model listed them.
        calls: Vec<ToolCall>,
    },
}

/// Errors from a model backend.
#[derive(Debug, Error)]
pub enum ModelError {
    /// The endpoint could not be reached.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        /// URL that was requested.
        endpoint: String,
        /// Transport error text.
        reason: String,
    },

    /// The endpoint did not answer in time.
    #[error("model request timed out after {duration_secs}s")]
    Timeout {
        /// Configured timeout.
        duration_secs: u64,
    },

    /// Non-2xx response.
    #[error("HTTP {status}: {body}")]
    Http {
        /// Status code.
        status: u16,
        /// Response body.
        body: String,
    },

    /// The response could not be interpreted.
    #[error("invalid model response: {reason}")]
    InvalidResponse {
        /// What was wrong.
        reason: String,
    },

    /// The API credential is not configured.
    #[error("environment variable {var} is not set")]
    MissingCredential {
        /// Variable that was expected to hold the key.
        var: String,
    },
}

impl ModelError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::Timeout { .. }
                | Self::Http {
                    status: 429 | 500 | 502 | 503 | 504,
                    ..
                }
        )
    }
}

/// A chat completion backend.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Produces the next assistant turn for `messages`.
    ///
    /// `tools` may be empty, in which case the model cannot request calls.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ModelReply, ModelError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn retriable_errors() {
        assert!(ModelError::ConnectionFailed {
            endpoint: "http://localhost".to_string(),
            reason: "refused".to_string(),
        }
        .is_retriable());
        assert!(ModelError::Timeout { duration_secs: 60 }.is_retriable());
        for status in [429, 500, 502, 503, 504] {
            assert!(ModelError::Http {
                status,
                body: String::new(),
            }
            .is_retriable());
        }
    }

    #[test]
    fn permanent_errors() {
        for status in [400, 401, 403, 404] {
            assert!(!ModelError::Http {
                status,
                body: String::new(),
            }
            .is_retriable());
        }
        assert!(!ModelError::MissingCredential {
            var: "OPENAI_API_KEY".to_string(),
        }
        .is_retriable());
    }

    #[test]
    fn tool_definition_wire_shape() {
        let definition = ToolDefinition {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: "echo".to_string(),
                description: "Echo a message".to_string(),
                parameters: json!({"type": "object", "properties": {}}),
            },
        };
        assert_eq!(
            serde_json::to_value(&definition).unwrap(),
            json!({
                "type": "function",
                "function": {
                    "name": "echo",
                    "description": "Echo a message",
                    "parameters": {"type": "object", "properties": {}}
                }
            })
        );
    }
}
