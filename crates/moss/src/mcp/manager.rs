use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::client::{Connector, ErrorHandler, McpConnector, ToolServer};
use super::manifest::{Manifest, TransportKind};
use super::protocol::RemoteTool;
use crate::errors::McpError;
use crate::providers::utils::sanitize_function_name;
use crate::tools::{ToolDescriptor, ToolExecutor, ToolRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerState {
    Uninitialized,
    Initializing,
    Ready,
    Closing,
    Closed,
    Failed,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ManagerState::Uninitialized => "uninitialized",
            ManagerState::Initializing => "initializing",
            ManagerState::Ready => "ready",
            ManagerState::Closing => "closing",
            ManagerState::Closed => "closed",
            ManagerState::Failed => "failed",
        };
        f.write_str(name)
    }
}

struct Connection {
    name: String,
    kind: TransportKind,
    server: Arc<dyn ToolServer>,
    tools: Vec<String>,
}

/// Owns every MCP connection and the registry entries they contributed.
pub struct McpManager {
    registry: Arc<ToolRegistry>,
    connector: Arc<dyn Connector>,
    state: ManagerState,
    connections: Vec<Connection>,
    closing: Arc<AtomicBool>,
}

impl McpManager {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self::with_connector(registry, Arc::new(McpConnector))
    }

    pub fn with_connector(registry: Arc<ToolRegistry>, connector: Arc<dyn Connector>) -> Self {
        Self {
            registry,
            connector,
            state: ManagerState::Uninitialized,
            connections: Vec::new(),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn server_names(&self) -> Vec<&str> {
        self.connections.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn transports(&self) -> Vec<(&str, TransportKind)> {
        self.connections
            .iter()
            .map(|c| (c.name.as_str(), c.kind))
            .collect()
    }

    /// Names of every registry entry this manager added.
    pub fn registered_tools(&self) -> Vec<&str> {
        self.connections
            .iter()
            .flat_map(|c| c.tools.iter().map(String::as_str))
            .collect()
    }

    /// Connect to every server in the manifest and register their tools.
    ///
    /// On failure, everything established so far is torn down and the manager
    /// ends up [`ManagerState::Failed`].
    pub async fn initialize(&mut self, manifest_path: &Path) -> Result<(), McpError> {
        match self.state {
            ManagerState::Ready => return Ok(()),
            ManagerState::Uninitialized => {}
            state => {
                return Err(McpError::InvalidState {
                    operation: "initialize",
                    state: state.to_string(),
                })
            }
        }

        self.state = ManagerState::Initializing;
        match self.connect_all(manifest_path).await {
            Ok(()) => {
                self.state = ManagerState::Ready;
                info!(
                    servers = self.connections.len(),
                    tools = self.registered_tools().len(),
                    "MCP servers ready"
                );
                Ok(())
            }
            Err(e) => {
                self.closing.store(true, Ordering::SeqCst);
                let connections = std::mem::take(&mut self.connections);
                if let Err(cleanup) = cleanup(&self.registry, connections).await {
                    warn!(error = %cleanup, "Cleanup after failed MCP startup reported errors");
                }
                self.state = ManagerState::Failed;
                Err(e)
            }
        }
    }

    async fn connect_all(&mut self, manifest_path: &Path) -> Result<(), McpError> {
        let manifest = Manifest::load(manifest_path).await?;
        let targets = manifest
            .servers()
            .map(|(name, descriptor)| Ok((name.clone(), descriptor.transport(name)?)))
            .collect::<Result<Vec<_>, McpError>>()?;
        if targets.is_empty() {
            debug!(manifest = %manifest_path.display(), "No MCP servers configured");
            return Ok(());
        }

        let attempts = join_all(targets.into_iter().map(|(name, config)| {
            let connector = Arc::clone(&self.connector);
            let on_error = self.error_handler(&name);
            async move {
                let kind = config.kind();
                let result = connector.connect(&name, config, on_error).await;
                (name, kind, result)
            }
        }))
        .await;

        let mut failure = None;
        for (name, kind, result) in attempts {
            match result {
                Ok(server) => {
                    info!(server = %name, transport = %kind, "Connected to MCP server");
                    self.connections.push(Connection {
                        name,
                        kind,
                        server,
                        tools: Vec::new(),
                    });
                }
                Err(e) => {
                    error!(server = %name, transport = %kind, error = %e, "Failed to connect to MCP server");
                    failure.get_or_insert(McpError::ConnectionFailed {
                        server: name,
                        source: Box::new(e),
                    });
                }
            }
        }
        if let Some(failure) = failure {
            return Err(failure);
        }

        let listings = join_all(self.connections.iter().map(|connection| {
            let server = Arc::clone(&connection.server);
            async move { server.list_tools().await }
        }))
        .await;

        for (index, listing) in listings.into_iter().enumerate() {
            let connection = &mut self.connections[index];
            let tools = listing.map_err(|e| McpError::ToolDiscoveryFailed {
                server: connection.name.clone(),
                source: Box::new(e),
            })?;

            for tool in tools {
                let registered = sanitize_function_name(&format!("{}_{}", connection.name, tool.name));
                // First registration wins so cleanup never removes someone else's entry
                if self.registry.contains(&registered) {
                    warn!(
                        server = %connection.name,
                        tool = %tool.name,
                        name = %registered,
                        "Skipping MCP tool whose name is already registered"
                    );
                    continue;
                }
                debug!(server = %connection.name, tool = %registered, "Registering MCP tool");
                self.registry.register(
                    registered.clone(),
                    remote_descriptor(Arc::clone(&connection.server), tool),
                );
                connection.tools.push(registered);
            }
        }
        Ok(())
    }

    fn error_handler(&self, server: &str) -> ErrorHandler {
        let closing = Arc::clone(&self.closing);
        let server = server.to_string();
        Arc::new(move |error: &McpError| {
            if closing.load(Ordering::SeqCst) && error.is_disconnect() {
                debug!(server = %server, %error, "MCP server disconnected during shutdown");
            } else {
                error!(server = %server, %error, "MCP connection error");
            }
        })
    }

    /// Remove this manager's tools and close every connection, waiting at most `timeout`.
    ///
    /// Calling it again is a no-op. When the timeout elapses the manager is still
    /// marked closed and its bookkeeping cleared.
    pub async fn close(&mut self, timeout: Duration) -> Result<(), McpError> {
        match self.state {
            ManagerState::Closing | ManagerState::Closed => return Ok(()),
            ManagerState::Failed => {
                self.state = ManagerState::Closed;
                return Ok(());
            }
            _ => {}
        }

        self.state = ManagerState::Closing;
        self.closing.store(true, Ordering::SeqCst);
        let connections = std::mem::take(&mut self.connections);
        let outcome = tokio::time::timeout(timeout, cleanup(&self.registry, connections)).await;
        self.state = ManagerState::Closed;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(McpError::CloseTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }
}

async fn cleanup(registry: &ToolRegistry, connections: Vec<Connection>) -> Result<(), McpError> {
    for connection in &connections {
        for tool in &connection.tools {
            registry.remove(tool);
        }
    }

    let results = join_all(connections.iter().map(|connection| async move {
        (connection.name.as_str(), connection.server.close().await)
    }))
    .await;

    let failures: Vec<String> = results
        .into_iter()
        .filter_map(|(name, result)| match result {
            Ok(()) => None,
            Err(e) if e.is_disconnect() => {
                debug!(server = %name, error = %e, "Ignoring disconnect while closing");
                None
            }
            Err(e) => Some(format!("{name}: {e}")),
        })
        .collect();

    if failures.is_empty() {
        Ok(())
    } else {
        Err(McpError::CloseFailed(failures.join("; ")))
    }
}

struct RemoteToolExecutor {
    server: Arc<dyn ToolServer>,
    tool: String,
}

#[async_trait]
impl ToolExecutor for RemoteToolExecutor {
    async fn execute(&self, input: Value) -> anyhow::Result<Value> {
        Ok(self.server.call_tool(&self.tool, input).await?)
    }
}

fn remote_descriptor(server: Arc<dyn ToolServer>, tool: RemoteTool) -> ToolDescriptor {
    let description = tool.description.unwrap_or_default();
    ToolDescriptor::new(
        tool.name.clone(),
        description,
        tool.input_schema,
        RemoteToolExecutor {
            server,
            tool: tool.name,
        },
    )
}
