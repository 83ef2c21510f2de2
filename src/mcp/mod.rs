//! Model Context Protocol (MCP) implementation.
//!
//! Both roles share one JSON-RPC engine. Transports deliver whole message
//! strings to the engine and carry its output back to the peer.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │          Client / McpServer (handshake, registries)          │
//! │                              │                               │
//! │                              ▼                               │
//! │   ┌───────────────────────────────────────────────────────┐  │
//! │   │  Protocol engine (correlation, timeouts, dispatch)    │  │
//! │   └───────────────────────────────────────────────────────┘  │
//! │                              │                               │
//! │                              ▼                               │
//! │   ┌─────────────┐    ┌──────────────┐    ┌──────────────┐    │
//! │   │    stdio    │    │  SSE client  │    │  SSE server  │    │
//! │   └─────────────┘    └──────────────┘    └──────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Protocol Version
//!
//! This implementation targets MCP protocol version 2024-11-05 and accepts
//! 2024-10-07 and 0.1.0.

pub mod client;
pub mod engine;
pub mod http;
pub mod protocol;
pub mod resource_template;
pub mod server;
pub mod transport;
pub mod types;

pub use client::{Client, ClientOptions};
pub use engine::{Progress, Protocol, ProtocolOptions, RequestContext, RequestOptions};
pub use http::{SseConfig, SseServer};
pub use protocol::{ErrorCode, RequestId, LATEST_PROTOCOL_VERSION};
pub use resource_template::ResourceTemplate;
pub use server::{McpServer, Server, ServerOptions};
pub use transport::{SseClientTransport, SseServerTransport, StdioTransport, Transport};
