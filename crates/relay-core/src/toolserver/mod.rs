//! External tool server host
//!
//! Spawns tool server subprocesses, speaks JSON-RPC to them over stdio, and
//! aggregates their tools behind the [`ToolHost`] trait the agent loop uses.

pub mod client;
pub mod manager;
pub mod protocol;
pub mod transport;

pub use client::ToolServerClient;
pub use manager::{ToolError, ToolHost, ToolHostManager, ToolOutcome};
