//! Model client layer
//!
//! - `types` - unified message/tool types shared across the crate
//! - `client` - the `ModelClient` facade the agent loop consumes
//! - `http` - reqwest-backed implementation for Anthropic/OpenAI dialects
//! - `format` - request/response/SSE handling per wire format

pub mod client;
pub mod format;
pub mod http;
pub mod types;

pub use client::{GenerateError, GenerateResponse, ModelClient, StreamPart};
pub use http::{ApiFormat, HttpModelClient, ProviderSpec};
pub use types::{assistant_message, Content, ModelMessage, Role, ToolCall, ToolDef, Usage};
