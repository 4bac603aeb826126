use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::{forward, Inbound, Transport};
use crate::errors::McpError;

type Sink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Frame>;

/// JSON-RPC carried in websocket text frames using the `mcp` subprotocol.
pub struct WebSocketTransport {
    sink: Mutex<Sink>,
    reader: JoinHandle<()>,
}

impl WebSocketTransport {
    pub async fn connect(url: &Url) -> Result<(Self, Inbound), McpError> {
        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| McpError::Transport(e.to_string()))?;
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("mcp"));

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| McpError::Transport(format!("websocket connect to {url} failed: {e}")))?;
        let (sink, mut source) = stream.split();

        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Frame::Text(text)) => forward(&text, &inbound_tx),
                    Ok(Frame::Binary(bytes)) => forward(&String::from_utf8_lossy(&bytes), &inbound_tx),
                    Ok(Frame::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = inbound_tx.send(Err(McpError::Disconnected(e.to_string())));
                        return;
                    }
                }
            }
            let _ = inbound_tx.send(Err(McpError::Disconnected(
                "websocket closed".to_string(),
            )));
        });

        Ok((
            Self {
                sink: Mutex::new(sink),
                reader,
            },
            inbound,
        ))
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, message: Value) -> Result<(), McpError> {
        let text = serde_json::to_string(&message)?;
        self.sink
            .lock()
            .await
            .send(Frame::Text(text))
            .await
            .map_err(|e| McpError::Disconnected(e.to_string()))
    }

    async fn close(&self) -> Result<(), McpError> {
        let result = self.sink.lock().await.close().await;
        self.reader.abort();
        result.map_err(|e| McpError::Disconnected(e.to_string()))
    }
}
