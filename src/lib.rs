//! mcp-chat-client: command-line client for Model Context Protocol servers
//!
//! This library launches an MCP server as a child process, talks JSON-RPC 2.0
//! to it over stdio, and bridges its tools into a chat with a language model.
//!
//! # Architecture
//!
//! - **Session**: handshake, request/response correlation and teardown
//! - **Bridge**: MCP tool descriptors to model function definitions and back
//! - **Chat loop**: user turn, model, tool rounds, final answer
//!
//! # Modules
//!
//! - [`mcp`] — MCP transport, codec and session
//! - [`bridge`] — Tool schema translation and dispatch
//! - [`chat`] — Conversation history and loop
//! - [`model`] — Language model backends
//! - [`members`] — Server member listing
//! - [`config`] — Configuration loading and validation
//! - [`error`] — Configuration error types

pub mod bridge;
pub mod chat;
pub mod config;
pub mod error;
pub mod mcp;
pub mod members;
pub mod model;
