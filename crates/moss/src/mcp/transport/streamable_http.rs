use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use super::{forward, Inbound, InboundSender, Transport};
use crate::errors::McpError;
use crate::sse::SseParser;

pub const SESSION_HEADER: &str = "mcp-session-id";

/// Streamable HTTP: every message is a POST, answers come back as JSON or an event stream.
pub struct StreamableHttpTransport {
    client: Client,
    url: Url,
    headers: HeaderMap,
    session_id: Mutex<Option<String>>,
    inbound: InboundSender,
}

impl StreamableHttpTransport {
    pub fn new(url: Url, headers: HeaderMap) -> Result<(Self, Inbound), McpError> {
        let client = Client::builder().build().map_err(McpError::from_http)?;
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        Ok((
            Self {
                client,
                url,
                headers,
                session_id: Mutex::new(None),
                inbound: inbound_tx,
            },
            inbound,
        ))
    }

    fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn remember_session(&self, response: &Response) {
        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
        {
            *self.session_id.lock().unwrap_or_else(PoisonError::into_inner) = Some(id.to_string());
        }
    }
}

#[async_trait]
impl Transport for StreamableHttpTransport {
    async fn send(&self, message: Value) -> Result<(), McpError> {
        let mut request = self
            .client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .header(ACCEPT, "application/json, text/event-stream")
            .json(&message);
        if let Some(session_id) = self.session_id() {
            request = request.header(SESSION_HEADER, session_id);
        }

        let response = request.send().await.map_err(McpError::from_http)?;
        self.remember_session(&response);

        let status = response.status();
        if status == StatusCode::ACCEPTED || status == StatusCode::NO_CONTENT {
            return Ok(());
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(McpError::Transport(format!("HTTP {status}: {body}")));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("text/event-stream") {
            // The stream may stay open for server requests, so drain it in the background.
            tokio::spawn(pump_events(response, self.inbound.clone()));
        } else {
            let body = response.text().await.map_err(McpError::from_http)?;
            if !body.trim().is_empty() {
                forward(&body, &self.inbound);
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), McpError> {
        let Some(session_id) = self.session_id() else {
            return Ok(());
        };
        let result = self
            .client
            .delete(self.url.clone())
            .headers(self.headers.clone())
            .header(SESSION_HEADER, session_id)
            .send()
            .await;
        if let Err(e) = result {
            debug!(url = %self.url, error = %e, "Failed to end MCP session");
        }
        Ok(())
    }
}

async fn pump_events(response: Response, inbound: InboundSender) {
    let mut parser = SseParser::default();
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                for event in parser.feed(&bytes) {
                    if matches!(event.event.as_deref(), None | Some("message")) && !event.data.is_empty() {
                        forward(&event.data, &inbound);
                    }
                }
            }
            Err(e) => {
                let _ = inbound.send(Err(McpError::Disconnected(e.to_string())));
                return;
            }
        }
    }
    if let Some(event) = parser.finish() {
        if !event.data.is_empty() {
            forward(&event.data, &inbound);
        }
    }
}
