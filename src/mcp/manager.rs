//! Connection manager for the configured tool servers.
//!
//! Owns one [`McpClient`] per reachable server plus the merged tool
//! catalogue. Everything here is best-effort: a server that fails to
//! connect is recorded and skipped, never fatal.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::sync::RwLock;

use super::client::McpClient;
use crate::config::ToolServerConfig;
use crate::error::AgentError;
use crate::models::{McpTool, McpToolResult};

#[derive(Default)]
struct ManagerState {
    clients: HashMap<String, Arc<McpClient>>,
    catalogue: Vec<McpTool>,
    /// tool name -> server id that won the name.
    owners: HashMap<String, String>,
    /// server id -> last connect error, for `tools` / health reporting.
    errors: HashMap<String, String>,
}

pub struct ClientManager {
    configs: Vec<ToolServerConfig>,
    state: RwLock<ManagerState>,
}

impl ClientManager {
    pub fn new(configs: Vec<ToolServerConfig>) -> Self {
        Self {
            configs,
            state: RwLock::new(ManagerState::default()),
        }
    }

    /// Connect every enabled server that is not already connected and
    /// rebuild the catalogue. Individual failures are recorded, not
    /// returned.
    pub async fn connect_all(&self) {
        let mut state = self.state.write().await;

        for config in self.configs.iter().filter(|c| c.enabled) {
            if let Some(existing) = state.clients.get(&config.id) {
                if existing.is_alive() {
                    continue;
                }
            }
            match McpClient::connect(config).await {
                Ok(client) => {
                    state.errors.remove(&config.id);
                    state.clients.insert(config.id.clone(), Arc::new(client));
                }
                Err(e) => {
                    eprintln!("Warning: failed to connect tool server '{}': {}", config.id, e);
                    state.errors.insert(config.id.clone(), e.to_string());
                    state.clients.remove(&config.id);
                }
            }
        }

        self.rebuild_catalogue(&mut state).await;
    }

    /// Re-list tools from every connected server. First server (in
    /// config order) to claim a name wins; shadowed duplicates are
    /// dropped with a warning.
    async fn rebuild_catalogue(&self, state: &mut ManagerState) {
        let mut listings: Vec<(String, Vec<McpTool>)> = Vec::new();

        for config in self.configs.iter().filter(|c| c.enabled) {
            let Some(client) = state.clients.get(&config.id) else {
                continue;
            };
            match client.list_tools().await {
                Ok(tools) => listings.push((config.id.clone(), tools)),
                Err(e) => {
                    eprintln!("Warning: failed to list tools on '{}': {}", config.id, e);
                    state.errors.insert(config.id.clone(), e.to_string());
                }
            }
        }

        let (catalogue, owners) = fold_catalogue(listings);
        state.catalogue = catalogue;
        state.owners = owners;
    }

    /// The merged tool catalogue, in config order.
    pub async fn catalogue(&self) -> Vec<McpTool> {
        self.state.read().await.catalogue.clone()
    }

    /// Connect failures by server id, for status output.
    pub async fn connect_errors(&self) -> HashMap<String, String> {
        self.state.read().await.errors.clone()
    }

    /// Invoke a tool by catalogue name. A dead transport gets one
    /// reconnect attempt before the tool is reported unavailable.
    pub async fn invoke(&self, name: &str, arguments: serde_json::Value) -> Result<McpToolResult> {
        let (server_id, client) = {
            let state = self.state.read().await;
            let Some(server_id) = state.owners.get(name).cloned() else {
                bail!(AgentError::ToolUnavailable(format!(
                    "no connected server exposes tool '{}'",
                    name
                )));
            };
            let Some(client) = state.clients.get(&server_id).cloned() else {
                bail!(AgentError::ToolUnavailable(format!(
                    "server '{}' for tool '{}' is not connected",
                    server_id, name
                )));
            };
            (server_id, client)
        };

        match client.call_tool(name, arguments.clone()).await {
            Ok(result) => Ok(result),
            Err(e) => {
                if e.downcast_ref::<AgentError>()
                    .map(|err| matches!(err, AgentError::TransportUnavailable(_)))
                    != Some(true)
                {
                    return Err(e);
                }
                eprintln!(
                    "Warning: connection to '{}' lost, reconnecting: {}",
                    server_id, e
                );
                let client = self.reconnect(&server_id).await.map_err(|reconnect_err| {
                    anyhow::anyhow!(AgentError::ToolUnavailable(format!(
                        "tool '{}' unavailable: reconnect to '{}' failed: {}",
                        name, server_id, reconnect_err
                    )))
                })?;
                client.call_tool(name, arguments).await.map_err(|retry_err| {
                    match retry_err.downcast_ref::<AgentError>() {
                        Some(AgentError::TransportUnavailable(_)) => {
                            anyhow::anyhow!(AgentError::ToolUnavailable(format!(
                                "tool '{}' unavailable: '{}' failed again after reconnect",
                                name, server_id
                            )))
                        }
                        _ => retry_err,
                    }
                })
            }
        }
    }

    async fn reconnect(&self, server_id: &str) -> Result<Arc<McpClient>> {
        let config = self
            .configs
            .iter()
            .find(|c| c.id == server_id)
            .ok_or_else(|| {
                AgentError::ToolUnavailable(format!("unknown tool server '{}'", server_id))
            })?;

        let client = Arc::new(McpClient::connect(config).await?);
        let mut state = self.state.write().await;
        if let Some(old) = state.clients.insert(server_id.to_string(), Arc::clone(&client)) {
            old.close().await;
        }
        state.errors.remove(server_id);
        Ok(client)
    }

    /// Tear everything down and connect from scratch.
    pub async fn reload(&self) {
        self.close_all().await;
        self.connect_all().await;
    }

    /// Close every connection. Safe to call more than once.
    pub async fn close_all(&self) {
        let mut state = self.state.write().await;
        for (_, client) in state.clients.drain() {
            client.close().await;
        }
        state.catalogue.clear();
        state.owners.clear();
    }
}

/// Merge per-server tool listings into one catalogue. Earlier servers
/// win name clashes.
fn fold_catalogue(
    listings: Vec<(String, Vec<McpTool>)>,
) -> (Vec<McpTool>, HashMap<String, String>) {
    let mut catalogue = Vec::new();
    let mut owners: HashMap<String, String> = HashMap::new();

    for (server_id, tools) in listings {
        for tool in tools {
            if let Some(owner) = owners.get(&tool.name) {
                eprintln!(
                    "Warning: tool '{}' on '{}' shadowed by '{}'",
                    tool.name, server_id, owner
                );
                continue;
            }
            owners.insert(tool.name.clone(), server_id.clone());
            catalogue.push(tool);
        }
    }

    (catalogue, owners)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(server_id: &str, name: &str) -> McpTool {
        McpTool {
            server_id: server_id.to_string(),
            name: name.to_string(),
            description: String::new(),
            input_schema: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn test_fold_catalogue_first_server_wins() {
        let (catalogue, owners) = fold_catalogue(vec![
            ("alpha".to_string(), vec![tool("alpha", "fetch"), tool("alpha", "read")]),
            ("beta".to_string(), vec![tool("beta", "fetch"), tool("beta", "write")]),
        ]);

        let names: Vec<&str> = catalogue.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["fetch", "read", "write"]);
        assert_eq!(owners["fetch"], "alpha");
        assert_eq!(owners["write"], "beta");
    }

    #[test]
    fn test_fold_catalogue_empty() {
        let (catalogue, owners) = fold_catalogue(Vec::new());
        assert!(catalogue.is_empty());
        assert!(owners.is_empty());
    }

    #[tokio::test]
    async fn test_invoke_unknown_tool() {
        let manager = ClientManager::new(Vec::new());
        let err = manager
            .invoke("missing", serde_json::json!({}))
            .await
            .unwrap_err();
        match err.downcast_ref::<AgentError>() {
            Some(AgentError::ToolUnavailable(msg)) => {
                assert!(msg.contains("missing"));
            }
            other => panic!("expected ToolUnavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_all_idempotent() {
        let manager = ClientManager::new(Vec::new());
        manager.close_all().await;
        manager.close_all().await;
        assert!(manager.catalogue().await.is_empty());
    }
}
