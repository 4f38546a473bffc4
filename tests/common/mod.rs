//! In-memory MCP servers for integration tests.
//!
//! Sessions are wired to the fake server through `tokio::io::duplex` pipes,
//! so no child process is needed.

#![allow(dead_code)]

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::task::JoinHandle;

use mcp_chat_client::mcp::session::IgnoreNotifications;
use mcp_chat_client::mcp::{Session, SessionSettings, StdioTransport, MCP_PROTOCOL_VERSION};

pub const GREETING_TEXT: &str = "Hello from the greeting file!";

/// The server end of a duplex pair, driven by hand.
pub struct Peer {
    lines: Lines<BufReader<DuplexStream>>,
    out: DuplexStream,
}

impl Peer {
    /// Reads the next frame the client sent.
    pub async fn next(&mut self) -> Value {
        let line = self.lines.next_line().await.unwrap().expect("client closed");
        serde_json::from_str(&line).unwrap()
    }

    /// Writes one raw line to the client.
    pub async fn send_raw(&mut self, line: &str) {
        self.out.write_all(line.as_bytes()).await.unwrap();
        self.out.write_all(b"\n").await.unwrap();
    }

    /// Answers request `id` with `result`.
    pub async fn respond(&mut self, id: &Value, result: Value) {
        let frame = json!({"jsonrpc": "2.0", "id": id, "result": result});
        self.send_raw(&frame.to_string()).await;
    }

    /// Completes the server side of the handshake.
    pub async fn accept_handshake(&mut self) {
        let init = self.next().await;
        assert_eq!(init["method"], "initialize");
        self.respond(&init["id"], initialize_result()).await;
        let initialized = self.next().await;
        assert_eq!(initialized["method"], "notifications/initialized");
    }
}

fn duplex_session(settings: SessionSettings) -> (Session, DuplexStream, DuplexStream) {
    let (client_out, server_in) = tokio::io::duplex(64 * 1024);
    let (server_out, client_in) = tokio::io::duplex(64 * 1024);
    let transport = StdioTransport::from_streams(client_in, client_out);
    let session = Session::start(transport, settings, Arc::new(IgnoreNotifications));
    (session, server_in, server_out)
}

/// A session whose server is driven by hand. The handshake has not run.
pub fn manual_session(settings: SessionSettings) -> (Session, Peer) {
    let (session, server_in, out) = duplex_session(settings);
    let peer = Peer {
        lines: BufReader::new(server_in).lines(),
        out,
    };
    (session, peer)
}

/// A ready session whose server is driven by hand.
pub async fn ready_manual_session(settings: SessionSettings) -> (Arc<Session>, Peer) {
    let (session, mut peer) = manual_session(settings);
    let (result, ()) = tokio::join!(session.initialize(), peer.accept_handshake());
    result.unwrap();
    (Arc::new(session), peer)
}

/// A ready session backed by a scripted server.
///
/// The server declares one tool (`echo`), one prompt (`greeting_prompt`) and
/// one resource (`file://./greeting.txt`).
pub async fn scripted_session() -> (Arc<Session>, JoinHandle<()>) {
    let (session, server_in, server_out) = duplex_session(SessionSettings::default());
    let server = tokio::spawn(run_scripted_server(server_in, server_out));
    session.initialize().await.unwrap();
    (Arc::new(session), server)
}

pub fn initialize_result() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {"tools": {}, "prompts": {}, "resources": {}},
        "serverInfo": {"name": "mcp_server", "version": "1.0.0"}
    })
}

async fn run_scripted_server(input: DuplexStream, mut output: DuplexStream) {
    let mut lines = BufReader::new(input).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(frame) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        let (Some(id), Some(method)) = (frame.get("id"), frame["method"].as_str()) else {
            continue;
        };

        let reply = match handle(method, &frame["params"]) {
            Ok(result) => json!({"jsonrpc": "2.0", "id": id, "result": result}),
            Err((code, message)) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {"code": code, "message": message}
            }),
        };

        let mut bytes = reply.to_string().into_bytes();
        bytes.push(b'\n');
        if output.write_all(&bytes).await.is_err() {
            break;
        }
    }
}

fn handle(method: &str, params: &Value) -> Result<Value, (i32, String)> {
    match method {
        "initialize" => Ok(initialize_result()),
        "ping" => Ok(json!({})),
        "tools/list" => Ok(json!({
            "tools": [{
                "name": "echo",
                "description": "Echo a message back to the caller.",
                "inputSchema": {
                    "type": "object",
                    "properties": {"message": {"type": "string"}},
                    "required": ["message"]
                }
            }]
        })),
        "prompts/list" => Ok(json!({
            "prompts": [{
                "name": "greeting_prompt",
                "description": "A prompt template for greeting someone kindly.",
                "arguments": [{"name": "name", "required": true}]
            }]
        })),
        "resources/list" => Ok(json!({
            "resources": [{
                "uri": "file://./greeting.txt",
                "name": "greeting_file",
                "description": "Read the greeting file.",
                "mimeType": "text/plain"
            }]
        })),
        "tools/call" => match params["name"].as_str() {
            Some("echo") => match params["arguments"]["message"].as_str() {
                Some(message) => Ok(json!({"content": [{"type": "text", "text": message}]})),
                None => Ok(json!({
                    "content": [{"type": "text", "text": "missing required argument: message"}],
                    "isError": true
                })),
            },
            other => Err((-32602, format!("Unknown tool: {}", other.unwrap_or_default()))),
        },
        "prompts/get" => match params["name"].as_str() {
            Some("greeting_prompt") => {
                let name = params["arguments"]["name"].as_str().unwrap_or("friend");
                Ok(json!({
                    "description": "A prompt template for greeting someone kindly.",
                    "messages": [{
                        "role": "user",
                        "content": {"type": "text", "text": format!("Greet {name} kindly.")}
                    }]
                }))
            }
            other => Err((-32602, format!("Unknown prompt: {}", other.unwrap_or_default()))),
        },
        "resources/read" => match params["uri"].as_str() {
            Some("file://./greeting.txt") => Ok(json!({
                "contents": [{
                    "uri": "file://./greeting.txt",
                    "mimeType": "text/plain",
                    "text": GREETING_TEXT
                }]
            })),
            other => Err((-32002, format!("Resource not found: {}", other.unwrap_or_default()))),
        },
        other => Err((-32601, format!("Method not found: {other}"))),
    }
}
