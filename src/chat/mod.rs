//! Conversation loop.
//!
//! One user turn runs as follows:
//!
//! 1. Append the user message to the history
//! 2. Fetch the tool schema (once per turn)
//! 3. Ask the model for the next assistant turn
//! 4. If it requested tools, dispatch them concurrently, append the results
//!    and go back to 3; otherwise append the answer and return it
//!
//! The number of tool rounds per user turn is capped. A model that keeps
//! requesting tools fails the turn with [`ChatError::ToolLoopExceeded`].

mod error;
mod message;

pub use error::ChatError;
pub use message::{ChatMessage, Conversation, Role, ToolCall};

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::bridge::{ToolDispatcher, ToolTurn};
use crate::config::ChatConfig;
use crate::model::{ModelBackend, ModelReply};

/// Something that happened on the way to the final answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEntry {
    /// Text the model sent alongside a tool request.
    Text(String),
    /// A dispatched tool call.
    Tool(ToolTurn),
}

/// Result of one user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// The model's final answer.
    pub reply: String,
    /// Interim text and tool calls, in the order they happened.
    pub entries: Vec<TurnEntry>,
}

impl TurnOutcome {
    /// Every tool call made while producing the answer, in dispatch order.
    #[must_use]
    pub fn tool_turns(&self) -> Vec<&ToolTurn> {
        self.entries
            .iter()
            .filter_map(|entry| match entry {
                TurnEntry::Tool(turn) => Some(turn),
                TurnEntry::Text(_) => None,
            })
            .collect()
    }

    /// Renders the turn for display: interim text and one line per tool
    /// call, then the reply.
    #[must_use]
    pub fn transcript(&self) -> String {
        let mut lines: Vec<String> = self
            .entries
            .iter()
            .map(|entry| match entry {
                TurnEntry::Text(text) => text.clone(),
                TurnEntry::Tool(turn) if turn.is_error => {
                    let message = turn.content.strip_prefix("Error: ").unwrap_or(&turn.content);
                    format!("[Tool error: {message}]")
                }
                TurnEntry::Tool(turn) => format!("[Used {}({})]", turn.name, turn.arguments),
            })
            .collect();
        if !self.reply.is_empty() {
            lines.push(self.reply.clone());
        }
        lines.join("\n")
    }
}

/// Drives a conversation between the user, the model and the MCP tools.
pub struct ChatLoop {
    model: Arc<dyn ModelBackend>,
    tools: Arc<dyn ToolDispatcher>,
    conversation: Conversation,
    max_tool_rounds: usize,
}

impl ChatLoop {
    /// Creates a loop with an empty (or system-seeded) history.
    pub fn new(
        model: Arc<dyn ModelBackend>,
        tools: Arc<dyn ToolDispatcher>,
        config: &ChatConfig,
    ) -> Self {
        let conversation = config
            .system_prompt
            .as_ref()
            .map_or_else(Conversation::new, |prompt| {
                Conversation::with_system_prompt(prompt.as_str())
            });

        Self {
            model,
            tools,
            conversation,
            max_tool_rounds: config.max_tool_rounds,
        }
    }

    /// The history so far.
    #[must_use]
    pub const fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Runs one user turn to completion.
    ///
    /// A tool that fails is reported back to the model. A session that dies
    /// mid-round fails the turn.
    ///
    /// # Errors
    ///
    /// Returns `ToolLoopExceeded` when the round cap is hit, `Model` when the
    /// backend fails and `Session` when the tool schema cannot be fetched or
    /// the session ends during a tool round.
    pub async fn send(&mut self, input: &str) -> Result<TurnOutcome, ChatError> {
        self.conversation.push(ChatMessage::user(input));

        let schema = self.tools.tool_schema().await?;
        let mut entries = Vec::new();
        let mut rounds = 0usize;

        loop {
            let reply = self
                .model
                .complete(self.conversation.messages(), &schema)
                .await?;

            let (content, calls) = match reply {
                ModelReply::Final(text) => {
                    self.conversation.push(ChatMessage::assistant(text.clone()));
                    info!(rounds, entries = entries.len(), "Turn complete");
                    return Ok(TurnOutcome {
                        reply: text,
                        entries,
                    });
                }
                ModelReply::ToolCalls { content, calls } => (content, calls),
            };

            if rounds == self.max_tool_rounds {
                warn!(rounds, "Model exceeded tool round limit");
                return Err(ChatError::ToolLoopExceeded { rounds });
            }

            debug!(round = rounds + 1, calls = calls.len(), "Dispatching tool calls");

            let results = join_all(calls.iter().map(|call| self.tools.dispatch(call)))
                .await
                .into_iter()
                .collect::<Result<Vec<_>, _>>()?;

            if let Some(text) = content.as_deref().filter(|text| !text.is_empty()) {
                entries.push(TurnEntry::Text(text.to_string()));
            }
            self.conversation
                .push(ChatMessage::assistant_with_calls(content, calls));
            for turn in results {
                self.conversation
                    .push(ChatMessage::tool(turn.call_id.clone(), turn.content.clone()));
                entries.push(TurnEntry::Tool(turn));
            }
            rounds += 1;
        }
    }
}
