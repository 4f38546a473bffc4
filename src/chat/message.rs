//! Conversation history types.
//!
//! A [`Conversation`] is the ordered transcript sent to the model on every
//! completion request. It lives for one chat session and is only ever
//! appended to.

use serde_json::Value;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Instructions that seed the conversation.
    System,
    /// The human operator.
    User,
    /// The language model.
    Assistant,
    /// The result of a tool invocation.
    Tool,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    /// Identifier the result turn must echo back.
    pub id: String,
    /// Tool name as declared by the MCP server.
    pub name: String,
    /// Arguments, passed through to the server untouched.
    pub arguments: Value,
}

/// One entry in the conversation history.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Author.
    pub role: Role,
    /// Text content. Assistant turns that only carry tool calls may have none.
    pub content: Option<String>,
    /// Tool calls carried by an assistant turn.
    pub tool_calls: Vec<ToolCall>,
    /// For tool turns, the id of the call this result answers.
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn text(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Creates a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::text(Role::System, content)
    }

    /// Creates a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::text(Role::User, content)
    }

    /// Creates a final assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::text(Role::Assistant, content)
    }

    /// Creates an assistant message that requests tool calls.
    #[must_use]
    pub fn assistant_with_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content,
            tool_calls: calls,
            tool_call_id: None,
        }
    }

    /// Creates a tool result message answering `call_id`.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

/// Ordered conversation history.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    /// Creates an empty conversation.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Creates a conversation seeded with a system message.
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(prompt)],
        }
    }

    /// Appends a message.
    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// All messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the conversation is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The most recent message.
    #[must_use]
    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tool_message_references_call() {
        let message = ChatMessage::tool("call_1", "x");
        assert_eq!(message.role, Role::Tool);
        assert_eq!(message.tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(message.content.as_deref(), Some("x"));
    }

    #[test]
    fn assistant_turn_keeps_calls_in_order() {
        let calls = vec![
            ToolCall {
                id: "a".to_string(),
                name: "echo".to_string(),
                arguments: json!({"message": "1"}),
            },
            ToolCall {
                id: "b".to_string(),
                name: "echo".to_string(),
                arguments: json!({"message": "2"}),
            },
        ];
        let message = ChatMessage::assistant_with_calls(None, calls);
        assert!(message.content.is_none());
        let ids: Vec<_> = message.tool_calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn conversation_is_append_only() {
        let mut conversation = Conversation::with_system_prompt("Be brief.");
        conversation.push(ChatMessage::user("hi"));
        conversation.push(ChatMessage::assistant("hello"));

        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation.messages()[0].role, Role::System);
        assert_eq!(conversation.last().unwrap().content.as_deref(), Some("hello"));
    }
}
