use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::manifest::TransportConfig;
use super::protocol::{self, Incoming, ListToolsResult, RemoteTool};
use super::transport::{self, Inbound, Transport};
use crate::errors::McpError;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Receives errors that happen outside any request, such as a dropped connection.
pub type ErrorHandler = Arc<dyn Fn(&McpError) + Send + Sync>;

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, McpError>>>>>;

/// The operations the manager needs from a connected server.
#[async_trait]
pub trait ToolServer: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>, McpError>;

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError>;

    async fn close(&self) -> Result<(), McpError>;
}

/// Opens connections to servers described in the manifest.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        name: &str,
        config: TransportConfig,
        on_error: ErrorHandler,
    ) -> Result<Arc<dyn ToolServer>, McpError>;
}

/// Connects over the real transports.
#[derive(Debug, Default, Clone, Copy)]
pub struct McpConnector;

#[async_trait]
impl Connector for McpConnector {
    async fn connect(
        &self,
        name: &str,
        config: TransportConfig,
        on_error: ErrorHandler,
    ) -> Result<Arc<dyn ToolServer>, McpError> {
        let client = McpClient::connect(name, &config, on_error).await?;
        Ok(Arc::new(client))
    }
}

pub struct McpClient {
    name: String,
    transport: Arc<dyn Transport>,
    pending: Pending,
    next_id: AtomicU64,
    request_timeout: Duration,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl McpClient {
    /// Open the transport and complete the initialize handshake.
    pub async fn connect(
        name: &str,
        config: &TransportConfig,
        on_error: ErrorHandler,
    ) -> Result<Self, McpError> {
        let (transport, inbound) = transport::connect(config).await?;
        let client = Self::start(name, transport, inbound, on_error);
        if let Err(e) = client.initialize().await {
            let _ = client.shutdown().await;
            return Err(e);
        }
        Ok(client)
    }

    /// Wrap an already open transport and start routing its inbound messages.
    pub fn start(
        name: &str,
        transport: Arc<dyn Transport>,
        inbound: Inbound,
        on_error: ErrorHandler,
    ) -> Self {
        let pending: Pending = Arc::default();
        let reader = tokio::spawn(route_inbound(
            name.to_string(),
            Arc::clone(&transport),
            inbound,
            Arc::clone(&pending),
            on_error,
        ));

        Self {
            name: name.to_string(),
            transport,
            pending,
            next_id: AtomicU64::new(1),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            reader: Mutex::new(Some(reader)),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<(), McpError> {
        let result = self
            .request(
                "initialize",
                json!({
                    "protocolVersion": protocol::PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": protocol::CLIENT_NAME,
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                }),
            )
            .await?;

        let version = result
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        let remote = result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        info!(server = %self.name, protocol = version, remote, "MCP session initialized");
        self.notify("notifications/initialized", None).await
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending_map().insert(id, tx);

        if let Err(e) = self.transport.send(protocol::request(id, method, params)).await {
            self.pending_map().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(McpError::Disconnected(format!(
                "'{}' went away before answering {method}",
                self.name
            ))),
            Err(_) => {
                self.pending_map().remove(&id);
                Err(McpError::Timeout {
                    method: method.to_string(),
                })
            }
        }
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        self.transport
            .send(protocol::notification(method, params))
            .await
    }

    /// Close the transport and fail anything still waiting for an answer.
    pub async fn shutdown(&self) -> Result<(), McpError> {
        let result = self.transport.close().await;
        if let Some(reader) = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
        fail_pending(&self.pending, &self.name);
        result
    }

    fn pending_map(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Result<Value, McpError>>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ToolServer for McpClient {
    async fn list_tools(&self) -> Result<Vec<RemoteTool>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(cursor) => json!({ "cursor": cursor }),
                None => json!({}),
            };
            let page: ListToolsResult =
                serde_json::from_value(self.request("tools/list", params).await?)?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        debug!(server = %self.name, tools = tools.len(), "Listed MCP tools");
        Ok(tools)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, McpError> {
        self.request(
            "tools/call",
            json!({
                "name": name,
                "arguments": arguments,
            }),
        )
        .await
    }

    async fn close(&self) -> Result<(), McpError> {
        self.shutdown().await
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        if let Some(reader) = self
            .reader
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            reader.abort();
        }
    }
}

async fn route_inbound(
    name: String,
    transport: Arc<dyn Transport>,
    mut inbound: Inbound,
    pending: Pending,
    on_error: ErrorHandler,
) {
    while let Some(message) = inbound.recv().await {
        let message = match message.and_then(protocol::classify) {
            Ok(message) => message,
            Err(e) => {
                on_error(&e);
                continue;
            }
        };

        match message {
            Incoming::Response { id, result } => {
                let waiter = pending
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter
                            .send(result.map_err(|(code, message)| McpError::Rpc { code, message }));
                    }
                    None => debug!(server = %name, id, "Dropping response nobody is waiting for"),
                }
            }
            Incoming::Request { id, method, .. } => {
                let reply = if method == "ping" {
                    protocol::response(id, json!({}))
                } else {
                    protocol::error_response(
                        id,
                        protocol::METHOD_NOT_FOUND,
                        &format!("Method not found: {method}"),
                    )
                };
                if let Err(e) = transport.send(reply).await {
                    on_error(&e);
                }
            }
            Incoming::Notification { method, .. } => {
                debug!(server = %name, %method, "MCP notification");
            }
        }
    }

    fail_pending(&pending, &name);
}

fn fail_pending(pending: &Pending, name: &str) {
    let waiters: Vec<_> = pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .collect();
    for (_, waiter) in waiters {
        let _ = waiter.send(Err(McpError::Disconnected(format!(
            "connection to '{name}' closed"
        ))));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    /// Answers requests in-process the way a small server would.
    struct LoopbackTransport {
        inbound: mpsc::UnboundedSender<Result<Value, McpError>>,
        sent: Mutex<Vec<Value>>,
    }

    #[async_trait]
    impl Transport for LoopbackTransport {
        async fn send(&self, message: Value) -> Result<(), McpError> {
            self.sent.lock().unwrap().push(message.clone());
            let Some(id) = message.get("id").cloned() else {
                return Ok(());
            };
            let reply = match message["method"].as_str() {
                Some("initialize") => protocol::response(
                    id,
                    json!({"protocolVersion": protocol::PROTOCOL_VERSION, "serverInfo": {"name": "loopback"}}),
                ),
                Some("tools/list") if message["params"]["cursor"].is_null() => protocol::response(
                    id,
                    json!({"tools": [{"name": "first"}], "nextCursor": "page-2"}),
                ),
                Some("tools/list") => {
                    protocol::response(id, json!({"tools": [{"name": "second"}]}))
                }
                Some("tools/call") => {
                    protocol::error_response(id, -32602, "unknown tool")
                }
                // Replies to our answers to server requests
                _ => return Ok(()),
            };
            let _ = self.inbound.send(Ok(reply));
            Ok(())
        }

        async fn close(&self) -> Result<(), McpError> {
            Ok(())
        }
    }

    fn loopback() -> (Arc<LoopbackTransport>, Inbound) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(LoopbackTransport {
            inbound: tx,
            sent: Mutex::new(Vec::new()),
        });
        (transport, rx)
    }

    fn quiet() -> ErrorHandler {
        Arc::new(|_: &McpError| {})
    }

    #[tokio::test]
    async fn test_handshake_and_paginated_listing() {
        let (transport, inbound) = loopback();
        let client = McpClient::start("loop", transport.clone(), inbound, quiet());

        client.initialize().await.unwrap();
        let names: Vec<String> = client
            .list_tools()
            .await
            .unwrap()
            .into_iter()
            .map(|tool| tool.name)
            .collect();
        assert_eq!(names, vec!["first", "second"]);

        let sent = transport.sent.lock().unwrap().clone();
        assert_eq!(sent[0]["id"], 1);
        assert_eq!(sent[0]["params"]["clientInfo"]["name"], "moss-mcp-client");
        assert_eq!(sent[1]["method"], "notifications/initialized");
        assert!(sent[1].get("id").is_none());
        assert_eq!(sent[3]["params"]["cursor"], "page-2");
    }

    #[tokio::test]
    async fn test_rpc_errors_are_returned() {
        let (transport, inbound) = loopback();
        let client = McpClient::start("loop", transport, inbound, quiet());

        match client.call_tool("missing", json!({})).await {
            Err(McpError::Rpc { code, message }) => {
                assert_eq!(code, -32602);
                assert_eq!(message, "unknown tool");
            }
            other => panic!("expected an rpc error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_server_requests_are_answered() {
        let (transport, inbound) = loopback();
        let injector = transport.inbound.clone();
        let _client = McpClient::start("loop", transport.clone(), inbound, quiet());

        injector
            .send(Ok(json!({"jsonrpc": "2.0", "id": "p1", "method": "ping"})))
            .unwrap();
        injector
            .send(Ok(json!({"jsonrpc": "2.0", "id": "s1", "method": "sampling/createMessage"})))
            .unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while transport.sent.lock().unwrap().len() < 2 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let sent = transport.sent.lock().unwrap().clone();
        assert_eq!(sent[0], protocol::response(json!("p1"), json!({})));
        assert_eq!(sent[1]["error"]["code"], protocol::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_pending_requests_fail_when_connection_drops() {
        struct Silent;

        #[async_trait]
        impl Transport for Silent {
            async fn send(&self, _message: Value) -> Result<(), McpError> {
                Ok(())
            }

            async fn close(&self) -> Result<(), McpError> {
                Ok(())
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let reported = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reported);
        let client = McpClient::start(
            "silent",
            Arc::new(Silent),
            rx,
            Arc::new(move |e: &McpError| sink.lock().unwrap().push(e.to_string())),
        );

        let request = client.request("tools/list", json!({}));
        let drop_connection = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(Err(McpError::Disconnected("server closed its output".into())))
                .unwrap();
            drop(tx);
        };
        let (result, ()) = tokio::join!(request, drop_connection);

        assert!(matches!(result, Err(McpError::Disconnected(_))));
        assert_eq!(
            reported.lock().unwrap().as_slice(),
            ["Connection closed: server closed its output"]
        );
    }
}
