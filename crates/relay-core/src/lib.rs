//! relay-core: the agent runtime
//!
//! A conversation loop over pluggable model providers and external tool
//! servers, with user hooks at lifecycle points. The CLI in `relay-cli` is a
//! thin presentation layer over [`agent::AgentLoop`].

pub mod agent;
pub mod config;
pub mod hooks;
pub mod model;
pub mod toolserver;
