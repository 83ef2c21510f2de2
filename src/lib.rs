//! mcp-sdk: a Model Context Protocol engine
//!
//! This library implements both roles of the Model Context Protocol over a
//! pluggable transport.
//!
//! # Architecture
//!
//! - **Protocol engine**: JSON-RPC 2.0 request/response correlation with
//!   inactivity and max-total timeouts, cancellation and progress
//! - **Transports**: newline-framed stdio, SSE client, SSE server (with an
//!   `axum` front end)
//! - **Roles**: [`mcp::Client`] and [`mcp::McpServer`], the latter with
//!   tool, resource and prompt registries
//! - **Resource templates**: `{placeholder}` URI patterns used to route reads
//!
//! # Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`demo`]: The reference server served by the binary
//! - [`error`]: Error types
//! - [`mcp`]: MCP protocol implementation

pub mod config;
pub mod demo;
pub mod error;
pub mod mcp;
