//! MCP (Model Context Protocol) Server Implementation
//!
//! This module exposes the study memory as MCP tools over JSON-RPC 2.0,
//! protocol version 2025-06-18.


pub mod errors;
pub mod protocol;
pub mod server;
pub mod tools;

pub use errors::{McpError, McpResult};
pub use server::{McpServer, ToolHandler};
pub use tools::register_study_tools;
