//! Hook process I/O schemas
//!
//! What a hook subprocess receives on stdin and what it may print on stdout.
//! Field names follow the documented hook contract (snake_case input,
//! camelCase output), so external scripts stay portable.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::events::HookEvent;

/// Context fields common to every hook invocation.
///
/// Built fresh per hook call and discarded after the subprocess exits.
#[derive(Debug, Clone, Serialize)]
pub struct CommonInput {
    pub session_id: String,
    pub cwd: String,
    pub hook_event_name: String,
    pub timestamp: i64,
    pub model: String,
    pub interactive: bool,
}

/// Event-specific input payload, flattened next to [`CommonInput`].
#[derive(Debug, Clone)]
pub enum HookPayload {
    PreToolUse {
        tool_name: String,
        tool_input: Value,
    },
    PostToolUse {
        tool_name: String,
        tool_input: Value,
        tool_response: Value,
    },
    UserPromptSubmit {
        prompt: String,
    },
    Stop {
        response: String,
        /// "completed", "cancelled", or "error".
        stop_reason: String,
    },
}

impl HookPayload {
    pub fn event(&self) -> HookEvent {
        match self {
            HookPayload::PreToolUse { .. } => HookEvent::PreToolUse,
            HookPayload::PostToolUse { .. } => HookEvent::PostToolUse,
            HookPayload::UserPromptSubmit { .. } => HookEvent::UserPromptSubmit,
            HookPayload::Stop { .. } => HookEvent::Stop,
        }
    }

    /// Tool name for matcher-based events.
    pub fn tool_name(&self) -> Option<&str> {
        match self {
            HookPayload::PreToolUse { tool_name, .. }
            | HookPayload::PostToolUse { tool_name, .. } => Some(tool_name),
            _ => None,
        }
    }

    /// Serialize the full stdin object: common fields plus event fields.
    pub fn to_stdin_json(&self, common: &CommonInput) -> Value {
        let mut object = serde_json::to_value(common).unwrap_or_default();
        let fields = match self {
            HookPayload::PreToolUse {
                tool_name,
                tool_input,
            } => serde_json::json!({
                "tool_name": tool_name,
                "tool_input": tool_input,
            }),
            HookPayload::PostToolUse {
                tool_name,
                tool_input,
                tool_response,
            } => serde_json::json!({
                "tool_name": tool_name,
                "tool_input": tool_input,
                "tool_response": tool_response,
            }),
            HookPayload::UserPromptSubmit { prompt } => serde_json::json!({
                "prompt": prompt,
            }),
            HookPayload::Stop {
                response,
                stop_reason,
            } => serde_json::json!({
                "response": response,
                "stop_reason": stop_reason,
            }),
        };

        if let (Some(target), Some(source)) = (object.as_object_mut(), fields.as_object()) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
        object
    }
}

/// Structured output a hook may print on stdout (exit 0).
///
/// Every field is optional; an empty object is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HookOutput {
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_: Option<bool>,

    #[serde(rename = "stopReason", default, skip_serializing_if = "String::is_empty")]
    pub stop_reason: String,

    #[serde(rename = "suppressOutput", default, skip_serializing_if = "std::ops::Not::not")]
    pub suppress_output: bool,

    /// "approve", "block", or empty for default behavior.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub decision: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    /// Guidance surfaced to the model on the next turn.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub feedback: String,

    /// Extra context concatenated across hooks rather than overridden.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context: String,

    #[serde(rename = "systemPrompt", default, skip_serializing_if = "String::is_empty")]
    pub system_prompt: String,

    /// Replacement text for a tool's output (PostToolUse).
    #[serde(rename = "modifyOutput", default, skip_serializing_if = "String::is_empty")]
    pub modify_output: String,
}

impl HookOutput {
    /// Hard block synthesized from an exit-code-2 hook.
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            decision: "block".to_string(),
            reason: reason.into(),
            continue_: Some(false),
            ..Default::default()
        }
    }

    pub fn is_block(&self) -> bool {
        self.decision == "block"
    }
}
