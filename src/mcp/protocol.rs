//! JSON-RPC 2.0 message types and the line codec for MCP.
//!
//! This module defines the core message types used in the Model Context Protocol
//! and the encoding used on the stdio transport.
//!
//! # Message Types
//!
//! - **Request**: A message expecting a response (has `id` and `method`)
//! - **Response**: A reply to a request (has `id` and `result` or `error`)
//! - **Notification**: A one-way message (has `method`, no `id`)
//!
//! # Framing
//!
//! Each message is encoded as a single line of compact JSON. Compact
//! `serde_json` output never contains a raw newline (newlines inside strings
//! are escaped), so the transport can split frames on `\n` safely.
//!
//! # MCP-Specific Constraints
//!
//! - Request IDs must be strings or integers (never `null`)
//! - Request IDs must be unique within a session

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The MCP protocol version this implementation speaks.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Client name for capability negotiation.
pub const CLIENT_NAME: &str = "mcp-chat-client";

/// The JSON-RPC version marker carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// A JSON-RPC 2.0 request ID.
///
/// Per the MCP specification, IDs must be strings or integers, never `null`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric request ID.
    Number(u64),
    /// String request ID.
    String(String),
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(value: u64) -> Self {
        Self::Number(value)
    }
}

/// A JSON-RPC 2.0 request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always "2.0".
    pub jsonrpc: String,

    /// Unique request identifier.
    pub id: RequestId,

    /// The method to invoke.
    pub method: String,

    /// Optional parameters for the method.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Creates a new request.
    #[must_use]
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 notification message.
///
/// Notifications do not have an ID and do not expect a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Always "2.0".
    pub jsonrpc: String,

    /// The notification method.
    pub method: String,

    /// Optional parameters for the notification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    /// Creates a new notification.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 response, carrying either a result or an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always "2.0".
    pub jsonrpc: String,

    /// The request ID this response corresponds to.
    pub id: RequestId,

    /// The result of the method call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// The error, if the call failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl JsonRpcResponse {
    /// Creates a new success response.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates a new error response.
    #[must_use]
    pub fn failure(id: RequestId, error: ErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }

    /// Splits the response into its outcome.
    ///
    /// A response with neither field is treated as an empty success, which is
    /// what some servers send for `ping`.
    ///
    /// # Errors
    ///
    /// Returns the error object if the server reported a failure.
    pub fn into_result(self) -> Result<Value, ErrorObject> {
        match (self.result, self.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Object(serde_json::Map::new())),
        }
    }
}

/// Standard JSON-RPC 2.0 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received.
    ParseError,
    /// The JSON sent is not a valid Request object.
    InvalidRequest,
    /// The method does not exist or is not available.
    MethodNotFound,
    /// Invalid method parameters.
    InvalidParams,
    /// Internal JSON-RPC error.
    InternalError,
    /// Server-defined error.
    ServerError(i32),
}

impl ErrorCode {
    /// Returns the numeric code for this error.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::InternalError => -32603,
            Self::ServerError(code) => code,
        }
    }

    /// Maps a numeric code back to a known variant.
    #[must_use]
    pub const fn from_code(code: i32) -> Self {
        match code {
            -32700 => Self::ParseError,
            -32600 => Self::InvalidRequest,
            -32601 => Self::MethodNotFound,
            -32602 => Self::InvalidParams,
            -32603 => Self::InternalError,
            other => Self::ServerError(other),
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    /// The error code.
    pub code: i32,

    /// A short description of the error.
    pub message: String,

    /// Additional information about the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    /// Creates a new error with a custom message.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code.code(),
            message: message.into(),
            data: None,
        }
    }

    /// Creates a method-not-found error.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(ErrorCode::MethodNotFound, format!("Method not found: {method}"))
    }
}

/// Any message that can travel over the transport, in either direction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// A request expecting a response.
    Request(JsonRpcRequest),
    /// A response to an earlier request.
    Response(JsonRpcResponse),
    /// A one-way notification.
    Notification(JsonRpcNotification),
}

impl Message {
    /// Returns the request ID, if this message carries one.
    #[must_use]
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Request(req) => Some(&req.id),
            Self::Response(resp) => Some(&resp.id),
            Self::Notification(_) => None,
        }
    }
}

impl From<JsonRpcRequest> for Message {
    fn from(value: JsonRpcRequest) -> Self {
        Self::Request(value)
    }
}

impl From<JsonRpcNotification> for Message {
    fn from(value: JsonRpcNotification) -> Self {
        Self::Notification(value)
    }
}

impl From<JsonRpcResponse> for Message {
    fn from(value: JsonRpcResponse) -> Self {
        Self::Response(value)
    }
}

/// Errors produced while encoding or decoding a frame.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not valid JSON.
    #[error("frame is not valid JSON")]
    InvalidJson(#[source] serde_json::Error),

    /// The frame is JSON but not a JSON-RPC 2.0 message.
    #[error("frame is not a JSON-RPC 2.0 message: {reason}")]
    InvalidMessage {
        /// What was wrong with the frame.
        reason: String,
    },

    /// An error reply with a `null` id, sent by servers that could not
    /// parse one of our frames. It is well-formed but matches no request.
    #[error("error reply without a request id: {message} ({code})")]
    Unaddressed {
        /// The reported error code.
        code: i32,
        /// The reported error message.
        message: String,
    },

    /// A message could not be serialised.
    #[error("failed to encode message")]
    Encode(#[source] serde_json::Error),
}

impl DecodeError {
    /// Whether the frame was unreadable, as opposed to readable but
    /// impossible to route.
    #[must_use]
    pub const fn is_corrupt(&self) -> bool {
        !matches!(self, Self::Unaddressed { .. })
    }
}

/// Encodes a message as one frame (without the trailing newline).
///
/// # Errors
///
/// Returns an error if the message payload cannot be serialised.
pub fn encode(message: &Message) -> Result<String, DecodeError> {
    let json = serde_json::to_string(message).map_err(DecodeError::Encode)?;
    debug_assert!(
        !json.contains('\n'),
        "JSON message must not contain embedded newlines"
    );
    Ok(json)
}

/// Decodes one frame into a message.
///
/// # Errors
///
/// Returns a `DecodeError` if the JSON is malformed or not a valid message.
pub fn decode(frame: &str) -> Result<Message, DecodeError> {
    let value: Value = serde_json::from_str(frame).map_err(DecodeError::InvalidJson)?;

    let obj = value.as_object().ok_or_else(|| invalid("not a JSON object"))?;

    let jsonrpc = obj
        .get("jsonrpc")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("missing jsonrpc field"))?;
    if jsonrpc != JSONRPC_VERSION {
        return Err(invalid("jsonrpc field must be \"2.0\""));
    }

    let has_id = obj.get("id").is_some_and(|id| !id.is_null());
    let has_method = obj.contains_key("method");
    let has_outcome = obj.contains_key("result") || obj.contains_key("error");

    if !has_method && !has_id {
        if let Some(error) = obj.get("error") {
            let error: ErrorObject = serde_json::from_value(error.clone())
                .map_err(|e| invalid(format!("malformed error object: {e}")))?;
            return Err(DecodeError::Unaddressed {
                code: error.code,
                message: error.message,
            });
        }
    }

    match (has_method, has_id) {
        (true, true) => {
            let request: JsonRpcRequest = serde_json::from_value(value)
                .map_err(|e| invalid(format!("malformed request: {e}")))?;
            if request.method.is_empty() {
                return Err(invalid("method field cannot be empty"));
            }
            Ok(Message::Request(request))
        }
        (true, false) => {
            let notification: JsonRpcNotification = serde_json::from_value(value)
                .map_err(|e| invalid(format!("malformed notification: {e}")))?;
            Ok(Message::Notification(notification))
        }
        (false, true) if has_outcome => {
            let response: JsonRpcResponse = serde_json::from_value(value)
                .map_err(|e| invalid(format!("malformed response: {e}")))?;
            Ok(Message::Response(response))
        }
        _ => Err(invalid("neither a request, a response nor a notification")),
    }
}

fn invalid(reason: impl Into<String>) -> DecodeError {
    DecodeError::InvalidMessage {
        reason: reason.into(),
    }
}
