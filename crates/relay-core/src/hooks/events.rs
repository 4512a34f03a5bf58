//! Hook lifecycle events.

use serde::{Deserialize, Serialize};

/// A point in the runtime's lifecycle where user hooks can fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookEvent {
    /// Before any tool execution; can block the call.
    PreToolUse,
    /// After tool execution completes; can rewrite the output.
    PostToolUse,
    /// When the user submits a prompt, before agent processing.
    UserPromptSubmit,
    /// When the agent finishes responding to a prompt.
    Stop,
}

impl HookEvent {
    /// Whether this event selects hooks through tool-name matchers.
    /// Events without a tool-name concept run every configured entry.
    pub fn requires_matcher(&self) -> bool {
        matches!(self, HookEvent::PreToolUse | HookEvent::PostToolUse)
    }

    pub fn name(&self) -> &'static str {
        match self {
            HookEvent::PreToolUse => "PreToolUse",
            HookEvent::PostToolUse => "PostToolUse",
            HookEvent::UserPromptSubmit => "UserPromptSubmit",
            HookEvent::Stop => "Stop",
        }
    }
}

impl std::fmt::Display for HookEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}
