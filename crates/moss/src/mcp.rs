//! Remote tools served over the Model Context Protocol.
//!
//! [`manager::McpManager`] reads a manifest of servers, connects to each through
//! [`client::McpClient`] and registers their tools as `{server}_{tool}` in the
//! shared [`crate::tools::ToolRegistry`].
pub mod client;
pub mod manager;
pub mod manifest;
pub mod protocol;
pub mod transport;

pub use manager::{ManagerState, McpManager};
pub use manifest::{Manifest, ServerDescriptor, TransportConfig, TransportKind};
