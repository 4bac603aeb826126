use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("Failed to acquire config lock ({timeout_ms}ms). Another process might be using the same configuration.")]
    Timeout { timeout_ms: u64 },

    #[error("Config lock I/O failed: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum LogError {
    #[error("Message log I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("Message log is corrupted at line {line}: {reason}")]
    Corrupted { line: usize, reason: String },

    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Tool execution failed: {0}")]
    ExecutionFailed(String),
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Request failed with status {status}: {body}")]
    Request { status: u16, body: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed stream event: {0}")]
    Stream(String),

    #[error("Backend reported an error: {0}")]
    Backend(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("API key not found. Set OPENROUTER_API_KEY or add api_key to config.yml")]
    MissingApiKey,

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Failed to prepare config directory {}: {source}", path.display())]
    Directory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum McpError {
    #[error("MCP manifest not found: {}", path.display())]
    ManifestNotFound { path: PathBuf },

    #[error("Invalid MCP manifest {}: {reason}", path.display())]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("Unknown transport for MCP server '{server}': {reason}")]
    UnknownTransport { server: String, reason: String },

    #[error("Failed to connect to MCP server '{server}': {source}")]
    ConnectionFailed {
        server: String,
        #[source]
        source: Box<McpError>,
    },

    #[error("Failed to list tools of MCP server '{server}': {source}")]
    ToolDiscoveryFailed {
        server: String,
        #[source]
        source: Box<McpError>,
    },

    #[error("Closing MCP servers timed out after {timeout_ms}ms")]
    CloseTimeout { timeout_ms: u64 },

    #[error("Failed to close MCP servers: {0}")]
    CloseFailed(String),

    #[error("Cannot {operation} the MCP manager while it is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Connection closed: {0}")]
    Disconnected(String),

    #[error("Server returned error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request '{method}' timed out")]
    Timeout { method: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    pub fn from_io(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::UnexpectedEof => McpError::Disconnected(error.to_string()),
            _ => McpError::Transport(error.to_string()),
        }
    }

    pub fn from_http(error: reqwest::Error) -> Self {
        McpError::Transport(error.to_string())
    }

    /// Whether this error only says that the peer went away.
    ///
    /// These are expected while connections are being torn down and are not
    /// reported as failures during close.
    pub fn is_disconnect(&self) -> bool {
        match self {
            McpError::Disconnected(_) => true,
            McpError::Transport(message) => {
                let message = message.to_ascii_lowercase();
                ["aborted", "connection reset", "broken pipe", "connection closed"]
                    .iter()
                    .any(|signature| message.contains(signature))
            }
            _ => false,
        }
    }
}
