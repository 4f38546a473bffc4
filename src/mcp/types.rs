//! MCP payload shapes exchanged after the JSON-RPC envelope is stripped.
//!
//! Capability descriptors (`Tool`, `Prompt`, `Resource`) are immutable
//! snapshots taken at discovery time. Unknown fields sent by newer servers are
//! ignored rather than rejected.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::mcp::protocol::{CLIENT_NAME, MCP_PROTOCOL_VERSION};

/// Client information sent during initialisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name.
    pub name: String,
    /// Implementation version.
    #[serde(default)]
    pub version: String,
}

impl Default for Implementation {
    fn default() -> Self {
        Self {
            name: CLIENT_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Parameters for the `initialize` request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version requested by the client.
    pub protocol_version: String,
    /// Client capabilities. This client advertises none.
    pub capabilities: Value,
    /// Client information.
    pub client_info: Implementation,
}

impl Default for InitializeParams {
    fn default() -> Self {
        Self {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: Value::Object(serde_json::Map::new()),
            client_info: Implementation::default(),
        }
    }
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version chosen by the server.
    pub protocol_version: String,
    /// Capabilities advertised by the server.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Server information.
    pub server_info: Implementation,
    /// Optional usage instructions from the server.
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Capabilities a server may advertise.
///
/// Presence of a section means the server supports that family of methods.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerCapabilities {
    /// Tool support.
    #[serde(default)]
    pub tools: Option<Value>,
    /// Prompt support.
    #[serde(default)]
    pub prompts: Option<Value>,
    /// Resource support.
    #[serde(default)]
    pub resources: Option<Value>,
    /// Logging support.
    #[serde(default)]
    pub logging: Option<Value>,
}

/// A tool declared by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input.
    #[serde(default)]
    pub input_schema: Value,
}

/// A prompt template declared by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    /// Unique prompt name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Arguments the template accepts.
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// One argument of a prompt template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name.
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the argument must be supplied.
    #[serde(default)]
    pub required: bool,
}

/// A resource exposed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    /// Resource URI.
    pub uri: String,
    /// Display name. Falls back to the URI when the server omits it.
    #[serde(default)]
    pub name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// MIME type of the content, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Resource {
    /// The name to show for this resource.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.uri
        } else {
            &self.name
        }
    }
}

/// One page of a `*/list` result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListToolsResult {
    /// Tools on this page.
    #[serde(default)]
    pub tools: Vec<Tool>,
    /// Cursor for the next page.
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// One page of a `prompts/list` result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPromptsResult {
    /// Prompts on this page.
    #[serde(default)]
    pub prompts: Vec<Prompt>,
    /// Cursor for the next page.
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// One page of a `resources/list` result.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListResourcesResult {
    /// Resources on this page.
    #[serde(default)]
    pub resources: Vec<Resource>,
    /// Cursor for the next page.
    #[serde(default)]
    pub next_cursor: Option<String>,
}

/// Content item in a tool result or prompt message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Text content.
    Text {
        /// The text.
        text: String,
    },
    /// Base64 image data.
    Image {
        /// Encoded image.
        data: String,
        /// Image MIME type.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// An embedded resource.
    Resource {
        /// The resource contents.
        resource: ResourceContents,
    },
    /// A block type this client does not understand (audio, links, ...).
    #[serde(other)]
    Unknown,
}

impl Content {
    /// Renders the content as plain text for a chat transcript.
    #[must_use]
    pub fn as_text(&self) -> String {
        match self {
            Self::Text { text } => text.clone(),
            Self::Image { mime_type, .. } => format!("[image: {mime_type}]"),
            Self::Resource { resource } => resource
                .text
                .clone()
                .unwrap_or_else(|| format!("[resource: {}]", resource.uri)),
            Self::Unknown => "[unsupported content]".to_string(),
        }
    }
}

/// Result of `tools/call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    /// Content returned by the tool.
    #[serde(default)]
    pub content: Vec<Content>,
    /// Whether the tool reported a failure.
    #[serde(default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// Joins all content items into one text block.
    #[must_use]
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(Content::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One message of a rendered prompt.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptMessage {
    /// "user" or "assistant".
    pub role: String,
    /// Message content.
    pub content: Content,
}

/// Result of `prompts/get`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GetPromptResult {
    /// Optional description of the rendered prompt.
    #[serde(default)]
    pub description: Option<String>,
    /// Rendered messages.
    #[serde(default)]
    pub messages: Vec<PromptMessage>,
}

/// Contents of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    /// Resource URI.
    pub uri: String,
    /// MIME type, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    /// Text payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Base64 binary payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

/// Result of `resources/read`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadResourceResult {
    /// One entry per content part.
    #[serde(default)]
    pub contents: Vec<ResourceContents>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn initialize_params_shape() {
        let value = serde_json::to_value(InitializeParams::default()).unwrap();
        assert_eq!(value["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(value["clientInfo"]["name"], CLIENT_NAME);
        assert_eq!(value["capabilities"], json!({}));
    }

    #[test]
    fn parse_initialize_result_ignores_unknown_fields() {
        let result: InitializeResult = serde_json::from_value(json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {"listChanged": false}, "experimental": {}},
            "serverInfo": {"name": "mcp_server", "version": "1.2.0"}
        }))
        .unwrap();
        assert_eq!(result.server_info.name, "mcp_server");
        assert!(result.capabilities.tools.is_some());
        assert!(result.capabilities.prompts.is_none());
    }

    #[test]
    fn parse_tool_without_description() {
        let tool: Tool = serde_json::from_value(json!({
            "name": "echo",
            "inputSchema": {"type": "object", "properties": {"message": {"type": "string"}}}
        }))
        .unwrap();
        assert_eq!(tool.name, "echo");
        assert!(tool.description.is_none());
        assert_eq!(tool.input_schema["type"], "object");
    }

    #[test]
    fn resource_display_name_falls_back_to_uri() {
        let resource: Resource =
            serde_json::from_value(json!({"uri": "file://./greeting.txt"})).unwrap();
        assert_eq!(resource.display_name(), "file://./greeting.txt");
    }

    #[test]
    fn call_tool_result_joins_content() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "first"},
                {"type": "image", "data": "AAAA", "mimeType": "image/png"},
                {"type": "text", "text": "second"}
            ]
        }))
        .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.text(), "first\n[image: image/png]\nsecond");
    }

    #[test]
    fn unknown_content_types_keep_the_text_blocks() {
        let result: CallToolResult = serde_json::from_value(json!({
            "content": [
                {"type": "text", "text": "x"},
                {"type": "audio", "data": "AAAA", "mimeType": "audio/wav"},
                {"type": "resource_link", "uri": "file://./a.txt", "name": "a"}
            ]
        }))
        .unwrap();
        assert_eq!(result.content[1], Content::Unknown);
        assert_eq!(result.text(), "x\n[unsupported content]\n[unsupported content]");
    }

    #[test]
    fn parse_prompt_result() {
        let result: GetPromptResult = serde_json::from_value(json!({
            "description": "A prompt template for greeting someone kindly.",
            "messages": [
                {"role": "user", "content": {"type": "text", "text": "Greet Ada kindly."}}
            ]
        }))
        .unwrap();
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.messages[0].content.as_text(), "Greet Ada kindly.");
    }
}
