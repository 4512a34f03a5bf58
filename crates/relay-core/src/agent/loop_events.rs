//! Loop event and input channel types
//!
//! The agent loop runs as a spawned task and talks to its consumer over two
//! unbounded channels: `LoopEvent` out, `LoopInput` in. The CLI is a thin
//! presentation layer that maps events to terminal output and forwards user
//! interactions back in.

use crate::model::Usage;

/// State changes emitted by the running agent loop.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    /// A new generation step began (1-based).
    StepStarted { step: usize },
    /// Incremental assistant text while streaming.
    TextDelta { delta: String },
    /// Streamed text so far must be discarded; the loop is re-generating
    /// without streaming and will emit the full text again.
    StreamReset,
    /// Final assistant text for one generation step.
    TextComplete { text: String },
    /// A tool call is about to execute.
    ToolCallStarted {
        id: String,
        name: String,
        arguments: String,
    },
    /// A tool call finished (or was blocked/denied).
    ToolCallCompleted {
        id: String,
        name: String,
        output: String,
        is_error: bool,
    },
    /// A tool call needs user approval before executing.
    ApprovalRequest {
        id: String,
        name: String,
        arguments: String,
    },
    /// Token usage reported by the provider for one step.
    Usage { usage: Usage },
    /// The loop finished normally; `response` is the final assistant text.
    Done { response: String },
    /// The user cancelled generation; the transcript is unchanged.
    Cancelled,
    /// A fatal error ended the loop.
    Error { error: String },
}

/// User interactions sent into the running loop.
#[derive(Debug, Clone)]
pub enum LoopInput {
    /// Approve or deny a pending tool call.
    Approval { id: String, approved: bool },
    /// Request cancellation of the in-flight generation.
    Cancel,
}
