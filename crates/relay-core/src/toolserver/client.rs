//! Client for one tool server subprocess
//!
//! JSON-RPC over the stdio transport with a background receive loop routing
//! responses to pending requests by id.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, error, info};

use super::protocol::{
    ClientInfo, InitializeParams, InitializeResult, RpcRequest, RpcResponse, ServerToolDef,
    ToolCallParams, ToolCallResult, ToolsListResult, PROTOCOL_VERSION,
};
use super::transport::StdioTransport;
use crate::config::ToolServerConfig;

const REQUEST_TIMEOUT_SECS: u64 = 30;

type PendingMap = Arc<RwLock<HashMap<i64, oneshot::Sender<Result<Value>>>>>;

pub struct ToolServerClient {
    name: String,
    transport: Arc<StdioTransport>,
    next_id: AtomicI64,
    pending: PendingMap,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl ToolServerClient {
    /// Spawn the server process and start the receive loop. The protocol
    /// handshake is a separate step.
    pub async fn connect(name: &str, config: &ToolServerConfig, working_dir: &Path) -> Result<Self> {
        info!(server = name, "Connecting to tool server");

        let transport = Arc::new(
            StdioTransport::spawn(&config.command, &config.args, &config.env, working_dir).await?,
        );

        let pending: PendingMap = Arc::new(RwLock::new(HashMap::new()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let recv_transport = Arc::clone(&transport);
        let recv_pending = Arc::clone(&pending);
        let recv_name = name.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        debug!(server = %recv_name, "Shutting down receive loop");
                        break;
                    }
                    result = recv_transport.receive() => {
                        match result {
                            Ok(message) => {
                                if let Err(e) = route_message(&message, &recv_pending).await {
                                    error!(server = %recv_name, "Bad message from tool server: {e}");
                                }
                            }
                            Err(e) => {
                                error!(server = %recv_name, "Tool server receive error: {e}");
                                let mut pending = recv_pending.write().await;
                                for (_, tx) in pending.drain() {
                                    let _ = tx.send(Err(anyhow!("connection lost")));
                                }
                                break;
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            name: name.to_string(),
            transport,
            next_id: AtomicI64::new(1),
            pending,
            shutdown_tx: Some(shutdown_tx),
        })
    }

    /// Run the initialize handshake. Required before tools/list or tools/call.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: serde_json::json!({}),
            client_info: ClientInfo {
                name: "relay".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };

        let result: InitializeResult = self
            .request("initialize", Some(serde_json::to_value(params)?))
            .await?;

        info!(
            server = %self.name,
            protocol = %result.protocol_version,
            "Tool server initialized"
        );

        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    pub async fn list_tools(&self) -> Result<Vec<ServerToolDef>> {
        let result: ToolsListResult = self.request("tools/list", None).await?;
        info!(server = %self.name, tools = result.tools.len(), "Listed tools");
        Ok(result.tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments: if arguments.is_null() {
                None
            } else {
                Some(arguments)
            },
        };
        self.request("tools/call", Some(serde_json::to_value(params)?))
            .await
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn is_alive(&self) -> bool {
        self.transport.is_alive().await
    }

    async fn request<R: for<'de> serde::Deserialize<'de>>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<R> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = RpcRequest::new(id, method, params);
        let json = serde_json::to_string(&request)?;

        debug!(server = %self.name, id, method, "Tool server request");

        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(id, tx);
        self.transport.send(&json).await?;

        let result =
            tokio::time::timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS), rx).await;

        match result {
            Ok(Ok(Ok(value))) => Ok(serde_json::from_value(value)?),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(anyhow!("request cancelled")),
            Err(_) => {
                self.pending.write().await.remove(&id);
                Err(anyhow!("request timed out after {REQUEST_TIMEOUT_SECS}s"))
            }
        }
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        #[derive(serde::Serialize)]
        struct Notification {
            jsonrpc: &'static str,
            method: String,
            #[serde(skip_serializing_if = "Option::is_none")]
            params: Option<Value>,
        }

        let json = serde_json::to_string(&Notification {
            jsonrpc: "2.0",
            method: method.to_string(),
            params,
        })?;
        self.transport.send(&json).await
    }
}

impl Drop for ToolServerClient {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.try_send(());
        }
    }
}

async fn route_message(message: &str, pending: &PendingMap) -> Result<()> {
    let response: RpcResponse = serde_json::from_str(message)?;

    if let Some(id) = response.id {
        let mut pending = pending.write().await;
        if let Some(tx) = pending.remove(&id) {
            if let Some(error) = response.error {
                let _ = tx.send(Err(anyhow!(
                    "tool server error {}: {}",
                    error.code,
                    error.message
                )));
            } else {
                let _ = tx.send(Ok(response.result.unwrap_or(Value::Null)));
            }
        }
        return Ok(());
    }

    if let Some(method) = &response.method {
        debug!("Ignoring tool server notification: {method}");
    }
    Ok(())
}
