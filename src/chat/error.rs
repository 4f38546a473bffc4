//! Conversation loop errors.

use thiserror::Error;

use crate::mcp::SessionError;
use crate::model::ModelError;

/// Errors that end a user turn.
///
/// None of these end the conversation: the history stays consistent and the
/// next turn can proceed.
#[derive(Debug, Error)]
pub enum ChatError {
    /// The model kept requesting tools past the configured cap.
    #[error("model requested tools for {rounds} rounds without a final answer")]
    ToolLoopExceeded {
        /// Rounds that were dispatched before giving up.
        rounds: usize,
    },

    /// The model backend failed.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// The MCP session failed.
    #[error("MCP session error: {0}")]
    Session(#[from] SessionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_exceeded_names_rounds() {
        let err = ChatError::ToolLoopExceeded { rounds: 10 };
        assert!(err.to_string().contains("10 rounds"));
    }

    #[test]
    fn converts_from_lower_layers() {
        let err: ChatError = SessionError::SessionClosed.into();
        assert!(matches!(err, ChatError::Session(SessionError::SessionClosed)));

        let err: ChatError = ModelError::Timeout { duration_secs: 5 }.into();
        assert!(err.to_string().starts_with("model error"));
    }
}
