//! Model client facade
//!
//! The agent loop consumes this trait only; concrete implementations live in
//! `model::http`. Tests substitute their own.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{ModelMessage, ToolCall, ToolDef, Usage};

/// Generation failure taxonomy.
///
/// Only `Cancelled` and `Fatal` reach the loop controller's caller;
/// `Overloaded` is retried by the backoff layer above the invoker.
#[derive(Debug, Error)]
pub enum GenerateError {
    /// Transient provider overload (rate limit, 529 overloaded_error).
    #[error("model provider overloaded: {0}")]
    Overloaded(String),

    /// User pressed cancel while the call was in flight.
    #[error("generation cancelled by user")]
    Cancelled,

    /// Anything else: auth failure, malformed request, transport loss.
    #[error("model request failed: {0}")]
    Fatal(String),
}

impl GenerateError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerateError::Overloaded(_))
    }
}

/// A complete (non-streaming) model response.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    pub message: ModelMessage,
    pub usage: Usage,
}

/// One fragment of a streaming response.
#[derive(Debug, Clone)]
pub enum StreamPart {
    TextDelta { delta: String },
    ToolCallStart { id: String, name: String },
    ToolCallComplete { tool_call: ToolCall },
    Usage { usage: Usage },
    Error { error: String },
    Done,
}

/// Client for one LLM provider.
///
/// `generate` must abandon work promptly when `cancel` fires and return
/// `GenerateError::Cancelled`. `stream` hands back a fragment channel; a
/// mid-stream failure is reported as `StreamPart::Error` before the channel
/// closes.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Provider identifier ("anthropic", "openai", ...), used to select the
    /// streaming tool-call detection strategy.
    fn provider_id(&self) -> &str;

    async fn generate(
        &self,
        messages: &[ModelMessage],
        system_prompt: &str,
        tools: &[ToolDef],
        cancel: CancellationToken,
    ) -> Result<GenerateResponse, GenerateError>;

    async fn stream(
        &self,
        messages: &[ModelMessage],
        system_prompt: &str,
        tools: &[ToolDef],
    ) -> Result<mpsc::UnboundedReceiver<StreamPart>, GenerateError>;
}
