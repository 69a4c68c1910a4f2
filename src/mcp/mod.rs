//! MCP (Model Context Protocol) client stack.
//!
//! Speaks JSON-RPC 2.0 to tool servers over two wire bindings:
//! - **stdio** ([`stdio::StdioTransport`]) — spawn the server process and
//!   exchange newline-delimited JSON over its stdin/stdout.
//! - **SSE** ([`sse::SseTransport`]) — long-lived `GET {base}/sse` event
//!   stream for responses, plain HTTP POST for requests.
//!
//! Both bindings share the correlation machinery in [`transport`]: every
//! request id maps to a oneshot responder, a background reader completes
//! them as responses arrive, and per-call timeouts never tear down the
//! connection. [`client::McpClient`] layers the MCP handshake and tool
//! calls on top; [`manager::ClientManager`] aggregates the tool catalogue
//! across every configured server.

pub mod client;
pub mod manager;
pub mod sse;
pub mod stdio;
pub mod transport;

pub use client::McpClient;
pub use manager::ClientManager;
pub use transport::Transport;

use serde::{Deserialize, Serialize};

/// MCP protocol revision sent in the `initialize` handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC 2.0 request. Notifications carry no id and get no response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: Some(id),
            method: method.to_string(),
            params,
        }
    }

    pub fn notification(method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id: None,
            method: method.to_string(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response. Exactly one of `result`/`error` is set by a
/// conforming server.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
    /// Set on server-initiated notifications, which we ignore.
    #[serde(default)]
    pub method: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// `tools/list` result payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<ToolEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolEntry {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
}

/// `tools/call` result payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub is_error: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type", default)]
    pub content_type: String,
    #[serde(default)]
    pub text: Option<String>,
}
