//! Bridge between MCP tools and model function-calling.
//!
//! Translates the server's tool descriptors into the model's tool schema and
//! routes the model's tool calls back to the session. A failing tool does not
//! fail the conversation: it comes back as an error result turn the model can
//! read. A session that has ended does.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::chat::ToolCall;
use crate::mcp::{Session, SessionError, SessionResult, Tool};
use crate::model::{FunctionDefinition, ToolDefinition};

/// Description used when the server omits one.
pub const DEFAULT_DESCRIPTION: &str = "No description";

/// The result of dispatching one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolTurn {
    /// Id of the call this turn answers.
    pub call_id: String,
    /// Tool that was called.
    pub name: String,
    /// Arguments the tool was called with.
    pub arguments: Value,
    /// Text fed back to the model.
    pub content: String,
    /// Whether the call failed.
    pub is_error: bool,
}

impl ToolTurn {
    fn success(call: &ToolCall, content: String) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            content,
            is_error: false,
        }
    }

    fn failure(call: &ToolCall, message: &str) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            arguments: call.arguments.clone(),
            content: format!("Error: {message}"),
            is_error: true,
        }
    }
}

/// Source of tools for the conversation loop.
#[async_trait]
pub trait ToolDispatcher: Send + Sync {
    /// Current tool schema in the model's format.
    ///
    /// # Errors
    ///
    /// Returns an error if the tool list cannot be fetched.
    async fn tool_schema(&self) -> SessionResult<Vec<ToolDefinition>>;

    /// Runs one tool call. Per-call failures become error turns.
    ///
    /// # Errors
    ///
    /// Returns the session error if the session can no longer serve calls.
    async fn dispatch(&self, call: &ToolCall) -> SessionResult<ToolTurn>;
}

/// Maps MCP tool descriptors to model tool definitions.
///
/// Pure: the same input always yields the same output, in the same order.
#[must_use]
pub fn to_model_schema(tools: &[Tool]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|tool| ToolDefinition {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: tool.name.clone(),
                description: tool
                    .description
                    .clone()
                    .unwrap_or_else(|| DEFAULT_DESCRIPTION.to_string()),
                parameters: parameters_schema(&tool.input_schema),
            },
        })
        .collect()
}

fn parameters_schema(schema: &Value) -> Value {
    if schema.is_object() {
        schema.clone()
    } else {
        json!({ "type": "object", "properties": {} })
    }
}

/// [`ToolDispatcher`] backed by a live MCP session.
#[derive(Clone)]
pub struct ToolBridge {
    session: Arc<Session>,
}

impl ToolBridge {
    /// Creates a bridge over `session`.
    #[must_use]
    pub const fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// The underlying session.
    #[must_use]
    pub const fn session(&self) -> &Arc<Session> {
        &self.session
    }
}

#[async_trait]
impl ToolDispatcher for ToolBridge {
    async fn tool_schema(&self) -> SessionResult<Vec<ToolDefinition>> {
        let tools = self.session.list_tools().await?;
        debug!(tools = tools.len(), "Fetched tool schema");
        Ok(to_model_schema(&tools))
    }

    async fn dispatch(&self, call: &ToolCall) -> SessionResult<ToolTurn> {
        debug!(tool = %call.name, call_id = %call.id, "Dispatching tool call");

        match self.session.call_tool(&call.name, call.arguments.clone()).await {
            Ok(result) => Ok(ToolTurn::success(call, result.text())),
            Err(SessionError::Tool { message, .. }) => {
                warn!(tool = %call.name, error = %message, "Tool reported an error");
                Ok(ToolTurn::failure(call, &message))
            }
            Err(e) if e.is_terminal() => {
                warn!(tool = %call.name, error = %e, "Session ended during tool call");
                Err(e)
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Tool call failed");
                Ok(ToolTurn::failure(call, &e.to_string()))
            }
        }
    }
}
