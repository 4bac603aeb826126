//! Ways of moving JSON-RPC messages between the client and a server.
pub mod sse;
pub mod stdio;
pub mod streamable_http;
pub mod websocket;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use tokio::sync::mpsc;

use super::manifest::TransportConfig;
use crate::errors::McpError;

/// Everything a transport receives from the server, in arrival order.
///
/// A transport reports a fatal failure as a final `Err` and then closes the channel.
pub type Inbound = mpsc::UnboundedReceiver<Result<Value, McpError>>;
pub type InboundSender = mpsc::UnboundedSender<Result<Value, McpError>>;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: Value) -> Result<(), McpError>;

    async fn close(&self) -> Result<(), McpError>;
}

pub async fn connect(config: &TransportConfig) -> Result<(Arc<dyn Transport>, Inbound), McpError> {
    match config {
        TransportConfig::Stdio { command, args, env } => {
            let (transport, inbound) = stdio::StdioTransport::spawn(command, args, env)?;
            Ok((Arc::new(transport), inbound))
        }
        TransportConfig::StreamableHttp { url, headers } => {
            let (transport, inbound) =
                streamable_http::StreamableHttpTransport::new(url.clone(), header_map(headers)?)?;
            Ok((Arc::new(transport), inbound))
        }
        TransportConfig::Sse { url, headers } => {
            let (transport, inbound) =
                sse::SseTransport::connect(url.clone(), header_map(headers)?).await?;
            Ok((Arc::new(transport), inbound))
        }
        TransportConfig::WebSocket { url } => {
            let (transport, inbound) = websocket::WebSocketTransport::connect(url).await?;
            Ok((Arc::new(transport), inbound))
        }
    }
}

fn header_map(headers: &BTreeMap<String, String>) -> Result<HeaderMap, McpError> {
    headers
        .iter()
        .map(|(name, value)| {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| McpError::Transport(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| McpError::Transport(format!("invalid value for header '{name}': {e}")))?;
            Ok((name, value))
        })
        .collect()
}

/// Decode one inbound payload that may hold a single message or a batch.
fn forward(payload: &str, inbound: &InboundSender) {
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Array(batch)) => batch.into_iter().for_each(|message| {
            let _ = inbound.send(Ok(message));
        }),
        Ok(message) => {
            let _ = inbound.send(Ok(message));
        }
        Err(e) => {
            let _ = inbound.send(Err(McpError::Protocol(format!(
                "server sent invalid JSON: {e}"
            ))));
        }
    }
}
