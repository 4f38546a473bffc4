//! Error types for the MCP session layer.
//!
//! Transport-level variants (`Spawn`, `Transport`, `SessionClosed`) are terminal
//! for the session. Per-call variants (`Tool`, `NotFound`, `Rpc`, `Timeout`)
//! only affect the operation that produced them.

use std::io;

use thiserror::Error;

use crate::mcp::protocol::DecodeError;
use crate::mcp::session::SessionState;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur while talking to an MCP server.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The server process could not be started.
    #[error("failed to spawn server command '{command}'")]
    Spawn {
        /// The command line that was attempted.
        command: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Reading from or writing to the server failed, or the stream is closed.
    #[error("transport closed: {reason}")]
    Transport {
        /// What went wrong.
        reason: String,
    },

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The server sent something that violates the protocol.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },

    /// The initialize handshake failed.
    #[error("initialisation handshake failed: {message}")]
    Handshake {
        /// Why the handshake failed.
        message: String,
    },

    /// The server answered with a JSON-RPC error.
    #[error("server error [{code}]: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i32,
        /// Error message from the server.
        message: String,
    },

    /// The server reported a tool failure.
    #[error("tool '{name}' failed: {message}")]
    Tool {
        /// Tool name.
        name: String,
        /// Error text reported by the server.
        message: String,
    },

    /// A prompt or resource lookup missed.
    #[error("{kind} not found: {name} ({message})")]
    NotFound {
        /// "prompt" or "resource".
        kind: &'static str,
        /// The name or URI that was requested.
        name: String,
        /// Error text reported by the server.
        message: String,
    },

    /// An operation was attempted before the session was ready.
    #[error("session not ready (state: {state:?})")]
    NotReady {
        /// State at the time of the call.
        state: SessionState,
    },

    /// The session closed before the operation completed.
    #[error("session closed")]
    SessionClosed,

    /// No response arrived within the request timeout.
    #[error("request '{method}' timed out after {timeout_ms}ms")]
    Timeout {
        /// The method that timed out.
        method: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },
}

impl SessionError {
    /// Creates a transport error.
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Whether this error ends the session.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Spawn { .. } | Self::Transport { .. } | Self::SessionClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_error_names_command() {
        let err = SessionError::Spawn {
            command: "python3 server.py".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such file"),
        };
        assert!(err.to_string().contains("python3 server.py"));
        assert!(err.is_terminal());
    }

    #[test]
    fn per_call_errors_are_not_terminal() {
        let tool = SessionError::Tool {
            name: "echo".to_string(),
            message: "boom".to_string(),
        };
        assert_eq!(tool.to_string(), "tool 'echo' failed: boom");
        assert!(!tool.is_terminal());

        let missing = SessionError::NotFound {
            kind: "prompt",
            name: "nope".to_string(),
            message: "Unknown prompt".to_string(),
        };
        assert!(missing.to_string().starts_with("prompt not found: nope"));
        assert!(!missing.is_terminal());
    }

    #[test]
    fn not_ready_display() {
        let err = SessionError::NotReady {
            state: SessionState::Uninitialized,
        };
        assert!(err.to_string().contains("Uninitialized"));
    }
}
