//! Model Context Protocol (MCP) client implementation.
//!
//! This module implements the client side of the MCP specification: it spawns
//! a server as a child process, speaks JSON-RPC 2.0 over the child's stdio and
//! exposes the server's tools, prompts and resources as typed async calls.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         MCP Client                          │
//! │                                                             │
//! │   ┌─────────────┐    ┌─────────────┐    ┌─────────────┐    │
//! │   │   Session   │───▶│  Protocol   │───▶│  Transport  │    │
//! │   │ (lifecycle) │    │  (codec)    │    │  (stdio)    │    │
//! │   └─────────────┘    └─────────────┘    └─────────────┘    │
//! │          ▲                                     │            │
//! │          │          dispatch task              ▼            │
//! │   ┌─────────────────────────────────────────────────┐      │
//! │   │        pending table (id → completion slot)     │      │
//! │   └─────────────────────────────────────────────────┘      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation requests MCP protocol version 2024-11-05.

pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;
pub mod types;

pub use error::{SessionError, SessionResult};
pub use protocol::{JsonRpcRequest, JsonRpcResponse, RequestId, MCP_PROTOCOL_VERSION};
pub use session::{NotificationHandler, Session, SessionSettings, SessionState};
pub use transport::{ServerCommand, StdioTransport};
pub use types::{CallToolResult, Prompt, Resource, Tool};
