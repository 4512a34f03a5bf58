//! Tool host manager
//!
//! Aggregates tools from every connected server under one namespace. Tool
//! names are prefixed `server__tool` so the model can address a tool on a
//! specific server and the manager can route the call back.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::client::ToolServerClient;
use crate::config::ToolServerConfig;
use crate::model::ToolDef;

const NAME_SEPARATOR: &str = "__";

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("tool server {server} failed: {message}")]
    Server { server: String, message: String },
}

/// Result of a tool call that reached a server.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub output: String,
    pub is_error: bool,
}

/// The loop controller's view of available tools.
#[async_trait]
pub trait ToolHost: Send + Sync {
    async fn tools(&self) -> Vec<ToolDef>;
    async fn call(&self, name: &str, arguments: Value) -> Result<ToolOutcome, ToolError>;
}

pub struct ToolHostManager {
    clients: HashMap<String, Arc<ToolServerClient>>,
    tools: RwLock<Vec<ToolDef>>,
}

impl ToolHostManager {
    /// Connect to every configured server, run the handshake, and build the
    /// prefixed tool catalog. A server that fails to connect is skipped with
    /// a warning rather than failing startup.
    pub async fn connect_all(
        configs: &HashMap<String, ToolServerConfig>,
        working_dir: &Path,
    ) -> Self {
        let mut clients = HashMap::new();
        let mut tools = Vec::new();

        for (name, config) in configs {
            let client = match ToolServerClient::connect(name, config, working_dir).await {
                Ok(client) => client,
                Err(e) => {
                    warn!(server = %name, "Skipping tool server, connect failed: {e}");
                    continue;
                }
            };
            if let Err(e) = client.initialize().await {
                warn!(server = %name, "Skipping tool server, initialize failed: {e}");
                continue;
            }

            match client.list_tools().await {
                Ok(server_tools) => {
                    for tool in server_tools {
                        tools.push(ToolDef {
                            name: format!("{name}{NAME_SEPARATOR}{}", tool.name),
                            description: tool.description.unwrap_or_default(),
                            input_schema: tool.input_schema,
                        });
                    }
                }
                Err(e) => {
                    warn!(server = %name, "Tool listing failed: {e}");
                }
            }

            clients.insert(name.clone(), Arc::new(client));
        }

        info!(
            servers = clients.len(),
            tools = tools.len(),
            "Tool hosts ready"
        );

        Self {
            clients,
            tools: RwLock::new(tools),
        }
    }

    pub fn server_count(&self) -> usize {
        self.clients.len()
    }

    /// Split a prefixed tool name back into server and bare tool name.
    fn route(&self, name: &str) -> Option<(Arc<ToolServerClient>, String)> {
        let (server, tool) = name.split_once(NAME_SEPARATOR)?;
        let client = self.clients.get(server)?;
        Some((Arc::clone(client), tool.to_string()))
    }
}

#[async_trait]
impl ToolHost for ToolHostManager {
    async fn tools(&self) -> Vec<ToolDef> {
        self.tools.read().await.clone()
    }

    async fn call(&self, name: &str, arguments: Value) -> Result<ToolOutcome, ToolError> {
        let Some((client, tool)) = self.route(name) else {
            return Err(ToolError::UnknownTool(name.to_string()));
        };

        let result = client
            .call_tool(&tool, arguments)
            .await
            .map_err(|e| ToolError::Server {
                server: client.name().to_string(),
                message: e.to_string(),
            })?;

        Ok(ToolOutcome {
            output: result.render(),
            is_error: result.is_error,
        })
    }
}
