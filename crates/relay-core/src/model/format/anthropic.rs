//! Anthropic Messages API format
//!
//! Request building, response parsing, and SSE event handling.

use serde_json::{json, Value};

use crate::model::client::StreamPart;
use crate::model::types::{Content, ModelMessage, Role, ToolCall, ToolDef, Usage};

/// Convert conversation messages to Anthropic API message objects.
///
/// System messages are excluded (carried by the top-level `system` field);
/// tool-result messages are sent with the `user` role as the API requires.
pub fn convert_messages(messages: &[ModelMessage]) -> Vec<Value> {
    let mut api_messages = Vec::new();

    for message in messages {
        if message.role == Role::System {
            continue;
        }

        let role = match message.role {
            Role::Assistant => "assistant",
            _ => "user",
        };

        let mut blocks = Vec::new();
        for block in &message.content {
            match block {
                Content::Text { text } => {
                    blocks.push(json!({"type": "text", "text": text}));
                }
                Content::ToolUse { id, name, input } => {
                    blocks.push(json!({
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": input,
                    }));
                }
                Content::ToolResult {
                    tool_use_id,
                    output,
                    is_error,
                } => {
                    let mut result = json!({
                        "type": "tool_result",
                        "tool_use_id": tool_use_id,
                        "content": output,
                    });
                    if is_error.unwrap_or(false) {
                        result["is_error"] = json!(true);
                    }
                    blocks.push(result);
                }
            }
        }

        if !blocks.is_empty() {
            api_messages.push(json!({"role": role, "content": blocks}));
        }
    }

    api_messages
}

pub fn build_body(
    model: &str,
    system_prompt: &str,
    messages: &[ModelMessage],
    tools: &[ToolDef],
    max_tokens: usize,
    stream: bool,
) -> Value {
    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": convert_messages(messages),
    });

    if !system_prompt.is_empty() {
        body["system"] = Value::String(system_prompt.to_string());
    }

    if !tools.is_empty() {
        let tool_defs: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.input_schema,
                })
            })
            .collect();
        body["tools"] = Value::Array(tool_defs);
    }

    if stream {
        body["stream"] = json!(true);
    }

    body
}

/// Parse a complete (non-streaming) Messages API response.
pub fn parse_response(json: &Value) -> (ModelMessage, Usage) {
    let mut content = Vec::new();

    if let Some(blocks) = json.get("content").and_then(|c| c.as_array()) {
        for block in blocks {
            match block.get("type").and_then(|t| t.as_str()) {
                Some("text") => {
                    if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                        content.push(Content::Text {
                            text: text.to_string(),
                        });
                    }
                }
                Some("tool_use") => {
                    content.push(Content::ToolUse {
                        id: block
                            .get("id")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        name: block
                            .get("name")
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_string(),
                        input: block.get("input").cloned().unwrap_or(Value::Null),
                    });
                }
                _ => {}
            }
        }
    }

    let usage = parse_usage(json.get("usage"));

    (
        ModelMessage {
            role: Role::Assistant,
            content,
        },
        usage,
    )
}

fn parse_usage(value: Option<&Value>) -> Usage {
    let Some(value) = value else {
        return Usage::default();
    };
    Usage {
        input_tokens: value
            .get("input_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize,
        output_tokens: value
            .get("output_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize,
    }
}

/// Incremental SSE event parser for the Messages API stream.
///
/// Tool-use input arrives as `input_json_delta` fragments which are buffered
/// per content block and parsed on `content_block_stop`.
#[derive(Default)]
pub struct SseParser {
    tool_block: Option<PendingToolBlock>,
    usage: Usage,
}

struct PendingToolBlock {
    id: String,
    name: String,
    input_json: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one SSE `data:` payload; returns the stream parts it produced.
    pub fn feed(&mut self, data: &str) -> Vec<StreamPart> {
        let Ok(event) = serde_json::from_str::<Value>(data) else {
            return Vec::new();
        };

        let mut parts = Vec::new();

        match event.get("type").and_then(|t| t.as_str()) {
            Some("content_block_start") => {
                let block = event.get("content_block");
                if block.and_then(|b| b.get("type")).and_then(|t| t.as_str()) == Some("tool_use") {
                    let id = block
                        .and_then(|b| b.get("id"))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    let name = block
                        .and_then(|b| b.get("name"))
                        .and_then(|v| v.as_str())
                        .unwrap_or_default()
                        .to_string();
                    parts.push(StreamPart::ToolCallStart {
                        id: id.clone(),
                        name: name.clone(),
                    });
                    self.tool_block = Some(PendingToolBlock {
                        id,
                        name,
                        input_json: String::new(),
                    });
                }
            }
            Some("content_block_delta") => {
                let delta = event.get("delta");
                match delta.and_then(|d| d.get("type")).and_then(|t| t.as_str()) {
                    Some("text_delta") => {
                        if let Some(text) = delta.and_then(|d| d.get("text")).and_then(|t| t.as_str())
                        {
                            parts.push(StreamPart::TextDelta {
                                delta: text.to_string(),
                            });
                        }
                    }
                    Some("input_json_delta") => {
                        if let Some(pending) = self.tool_block.as_mut() {
                            if let Some(fragment) = delta
                                .and_then(|d| d.get("partial_json"))
                                .and_then(|t| t.as_str())
                            {
                                pending.input_json.push_str(fragment);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Some("content_block_stop") => {
                if let Some(pending) = self.tool_block.take() {
                    let arguments = if pending.input_json.trim().is_empty() {
                        Value::Object(serde_json::Map::new())
                    } else {
                        serde_json::from_str(&pending.input_json)
                            .unwrap_or(Value::Object(serde_json::Map::new()))
                    };
                    parts.push(StreamPart::ToolCallComplete {
                        tool_call: ToolCall {
                            id: pending.id,
                            name: pending.name,
                            arguments,
                        },
                    });
                }
            }
            Some("message_start") => {
                self.usage = parse_usage(event.get("message").and_then(|m| m.get("usage")));
            }
            Some("message_delta") => {
                let delta_usage = parse_usage(event.get("usage"));
                if delta_usage.output_tokens > 0 {
                    self.usage.output_tokens = delta_usage.output_tokens;
                }
            }
            Some("message_stop") => {
                parts.push(StreamPart::Usage { usage: self.usage });
                parts.push(StreamPart::Done);
            }
            Some("error") => {
                let message = event
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .unwrap_or("stream error")
                    .to_string();
                parts.push(StreamPart::Error { error: message });
            }
            _ => {}
        }

        parts
    }
}
