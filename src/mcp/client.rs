//! MCP client: handshake, tool discovery, and tool calls against one
//! server.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::json;

use super::sse::SseTransport;
use super::stdio::StdioTransport;
use super::transport::Transport;
use super::{CallToolResult, JsonRpcRequest, ToolsListResult, PROTOCOL_VERSION};
use crate::config::ToolServerConfig;
use crate::error::AgentError;
use crate::models::{McpTool, McpToolResult};

pub struct McpClient {
    server_id: String,
    transport: Arc<dyn Transport>,
    next_id: AtomicI64,
    timeout: Duration,
}

impl McpClient {
    /// Open the configured transport and run the MCP handshake:
    /// `initialize`, then the `notifications/initialized` notification.
    pub async fn connect(config: &ToolServerConfig) -> Result<Self> {
        let transport: Arc<dyn Transport> = match config.transport.as_str() {
            "stdio" => {
                let command = config.command.as_ref().ok_or_else(|| {
                    AgentError::Config(format!("tools.{}: stdio requires a command", config.id))
                })?;
                Arc::new(StdioTransport::spawn(&config.id, command, &config.args, &config.env).await?)
            }
            "sse" => {
                let url = config.url.as_ref().ok_or_else(|| {
                    AgentError::Config(format!("tools.{}: sse requires a url", config.id))
                })?;
                Arc::new(SseTransport::connect(&config.id, url, &config.headers).await?)
            }
            other => bail!(AgentError::Config(format!(
                "tools.{}: unknown transport '{}'",
                config.id, other
            ))),
        };

        let client = Self::with_transport(
            &config.id,
            transport,
            Duration::from_secs(config.timeout_secs),
        );
        client.initialize().await?;
        Ok(client)
    }

    /// Wrap an already-open transport (used by `connect` and by tests).
    pub fn with_transport(
        server_id: &str,
        transport: Arc<dyn Transport>,
        timeout: Duration,
    ) -> Self {
        Self {
            server_id: server_id.to_string(),
            transport,
            next_id: AtomicI64::new(1),
            timeout,
        }
    }

    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    async fn initialize(&self) -> Result<()> {
        let req = JsonRpcRequest::new(
            self.next_id(),
            "initialize",
            Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "agent-harness",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
        );

        let response = self.transport.request(req, self.timeout).await?;
        if let Some(err) = response.error {
            bail!(AgentError::TransportUnavailable(format!(
                "initialize failed on '{}': {} (code {})",
                self.server_id, err.message, err.code
            )));
        }

        self.transport
            .notify(JsonRpcRequest::notification(
                "notifications/initialized",
                None,
            ))
            .await?;

        Ok(())
    }

    /// Ask the server what tools it exposes.
    pub async fn list_tools(&self) -> Result<Vec<McpTool>> {
        let req = JsonRpcRequest::new(self.next_id(), "tools/list", None);
        let response = self.transport.request(req, self.timeout).await?;

        if let Some(err) = response.error {
            bail!(
                "tools/list failed on '{}': {} (code {})",
                self.server_id,
                err.message,
                err.code
            );
        }

        let Some(result) = response.result else {
            return Ok(Vec::new());
        };
        let parsed: ToolsListResult =
            serde_json::from_value(result).context("invalid tools/list result")?;

        Ok(parsed
            .tools
            .into_iter()
            .map(|tool| McpTool {
                server_id: self.server_id.clone(),
                name: tool.name,
                description: tool.description.unwrap_or_default(),
                input_schema: tool
                    .input_schema
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            })
            .collect())
    }

    /// Invoke one tool. Tool-level failures (JSON-RPC errors, `isError`
    /// results) come back as `McpToolResult { is_error: true }` so the
    /// caller can feed them to the model; transport failures and timeouts
    /// are `Err`.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<McpToolResult> {
        let req = JsonRpcRequest::new(
            self.next_id(),
            "tools/call",
            Some(json!({"name": name, "arguments": arguments})),
        );

        let response = match self.transport.request(req, self.timeout).await {
            Ok(response) => response,
            Err(e) => {
                // Name the tool, not the JSON-RPC method, in timeouts.
                if let Some(AgentError::ToolTimeout { timeout_secs, .. }) =
                    e.downcast_ref::<AgentError>()
                {
                    bail!(AgentError::ToolTimeout {
                        tool: name.to_string(),
                        timeout_secs: *timeout_secs,
                    });
                }
                return Err(e);
            }
        };

        if let Some(err) = response.error {
            return Ok(McpToolResult {
                content: format!("Error: {}", err.message),
                is_error: true,
            });
        }

        let Some(result) = response.result else {
            return Ok(McpToolResult {
                content: String::new(),
                is_error: false,
            });
        };

        let parsed: CallToolResult =
            serde_json::from_value(result).context("invalid tools/call result")?;
        let content = parsed
            .content
            .iter()
            .filter(|item| item.content_type == "text")
            .filter_map(|item| item.text.clone())
            .collect::<Vec<_>>()
            .join("\n");

        Ok(McpToolResult {
            content,
            is_error: parsed.is_error.unwrap_or(false),
        })
    }

    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}
