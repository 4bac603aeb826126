use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::{Client, Response};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;
use url::Url;

use super::{forward, Inbound, InboundSender, Transport};
use crate::errors::McpError;
use crate::sse::SseParser;

const ENDPOINT_TIMEOUT: Duration = Duration::from_secs(10);

/// Legacy HTTP+SSE: a long lived GET stream for inbound messages and POSTs to the
/// endpoint the server announces on that stream.
pub struct SseTransport {
    client: Client,
    endpoint: Url,
    headers: HeaderMap,
    reader: JoinHandle<()>,
}

impl SseTransport {
    pub async fn connect(url: Url, headers: HeaderMap) -> Result<(Self, Inbound), McpError> {
        let client = Client::builder().build().map_err(McpError::from_http)?;
        let response = client
            .get(url.clone())
            .headers(headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(McpError::from_http)?;
        if !response.status().is_success() {
            return Err(McpError::Transport(format!(
                "HTTP {} opening event stream {url}",
                response.status()
            )));
        }

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let reader = tokio::spawn(read_events(url.clone(), response, inbound_tx, endpoint_tx));

        let endpoint = match tokio::time::timeout(ENDPOINT_TIMEOUT, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                reader.abort();
                return Err(McpError::Disconnected(
                    "event stream closed before announcing an endpoint".to_string(),
                ));
            }
            Err(_) => {
                reader.abort();
                return Err(McpError::Timeout {
                    method: "endpoint".to_string(),
                });
            }
        };
        debug!(%endpoint, "MCP server announced its message endpoint");

        Ok((
            Self {
                client,
                endpoint,
                headers,
                reader,
            },
            inbound,
        ))
    }
}

async fn read_events(
    base: Url,
    response: Response,
    inbound: InboundSender,
    endpoint: oneshot::Sender<Url>,
) {
    let mut endpoint = Some(endpoint);
    let mut parser = SseParser::default();
    let mut body = response.bytes_stream();

    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = inbound.send(Err(McpError::Disconnected(e.to_string())));
                return;
            }
        };
        for event in parser.feed(&bytes) {
            match event.event.as_deref() {
                Some("endpoint") => match base.join(event.data.trim()) {
                    Ok(url) => {
                        if let Some(sender) = endpoint.take() {
                            let _ = sender.send(url);
                        }
                    }
                    Err(e) => {
                        let _ = inbound.send(Err(McpError::Protocol(format!(
                            "invalid endpoint '{}': {e}",
                            event.data
                        ))));
                    }
                },
                None | Some("message") => forward(&event.data, &inbound),
                Some(other) => debug!(event = other, "Ignoring event from MCP server"),
            }
        }
    }

    let _ = inbound.send(Err(McpError::Disconnected(
        "event stream ended".to_string(),
    )));
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&self, message: Value) -> Result<(), McpError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .json(&message)
            .send()
            .await
            .map_err(McpError::from_http)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Transport(format!("HTTP {status}: {body}")));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError> {
        self.reader.abort();
        Ok(())
    }
}
