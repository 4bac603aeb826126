use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::McpError;

/// The `mcp.json` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    #[serde(default)]
    pub mcp_servers: Option<BTreeMap<String, ServerDescriptor>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Sse,
    StreamableHttp,
    WebSocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Sse => "sse",
            TransportKind::StreamableHttp => "streamable-http",
            TransportKind::WebSocket => "websocket",
        };
        f.write_str(name)
    }
}

/// A fully resolved way to reach one server.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    Stdio {
        command: String,
        args: Vec<String>,
        env: BTreeMap<String, String>,
    },
    Sse {
        url: Url,
        headers: BTreeMap<String, String>,
    },
    StreamableHttp {
        url: Url,
        headers: BTreeMap<String, String>,
    },
    WebSocket {
        url: Url,
    },
}

impl TransportConfig {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportConfig::Stdio { .. } => TransportKind::Stdio,
            TransportConfig::Sse { .. } => TransportKind::Sse,
            TransportConfig::StreamableHttp { .. } => TransportKind::StreamableHttp,
            TransportConfig::WebSocket { .. } => TransportKind::WebSocket,
        }
    }
}

impl Manifest {
    pub async fn load(path: &Path) -> Result<Self, McpError> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(McpError::ManifestNotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => {
                return Err(McpError::InvalidManifest {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, McpError> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(text).map_err(|e| McpError::InvalidManifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn servers(&self) -> impl Iterator<Item = (&String, &ServerDescriptor)> {
        self.mcp_servers.iter().flatten()
    }
}

impl ServerDescriptor {
    /// An explicit `type` wins; otherwise `command` means stdio and `url` means SSE.
    pub fn transport_kind(&self, server: &str) -> Result<TransportKind, McpError> {
        match self.kind.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("stdio") => Ok(TransportKind::Stdio),
            Some("sse") => Ok(TransportKind::Sse),
            Some("streaming-http" | "streamable-http" | "mcp" | "http") => {
                Ok(TransportKind::StreamableHttp)
            }
            Some("websocket" | "ws") => Ok(TransportKind::WebSocket),
            Some(other) => Err(McpError::UnknownTransport {
                server: server.to_string(),
                reason: format!("unsupported type '{other}'"),
            }),
            None if self.command.is_some() => Ok(TransportKind::Stdio),
            None if self.url.is_some() => Ok(TransportKind::Sse),
            None => Err(McpError::UnknownTransport {
                server: server.to_string(),
                reason: "neither 'command' nor 'url' is set".to_string(),
            }),
        }
    }

    pub fn transport(&self, server: &str) -> Result<TransportConfig, McpError> {
        let missing = |field: &str, kind: TransportKind| McpError::UnknownTransport {
            server: server.to_string(),
            reason: format!("{kind} transport requires '{field}'"),
        };

        let kind = self.transport_kind(server)?;
        if kind == TransportKind::Stdio {
            let command = self
                .command
                .clone()
                .ok_or_else(|| missing("command", kind))?;
            return Ok(TransportConfig::Stdio {
                command,
                args: self.args.clone(),
                env: self.env.clone(),
            });
        }

        let raw = self.url.as_deref().ok_or_else(|| missing("url", kind))?;
        let url = Url::parse(raw).map_err(|e| McpError::UnknownTransport {
            server: server.to_string(),
            reason: format!("invalid url '{raw}': {e}"),
        })?;
        let headers = self.headers.clone();

        Ok(match kind {
            TransportKind::Sse => TransportConfig::Sse { url, headers },
            TransportKind::StreamableHttp => TransportConfig::StreamableHttp { url, headers },
            _ => TransportConfig::WebSocket { url },
        })
    }
}
