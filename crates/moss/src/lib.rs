pub mod agent;
pub mod config;
pub mod config_lock;
pub mod errors;
pub mod mcp;
pub mod memory;
pub mod models;
pub mod providers;
pub mod shutdown;
pub mod sse;
pub mod tools;
