//! OpenAI Chat Completions format
//!
//! Also used by OpenAI-compatible endpoints (Ollama, most aggregators).

use serde_json::{json, Value};

use crate::model::client::StreamPart;
use crate::model::types::{Content, ModelMessage, Role, ToolCall, ToolDef, Usage};

/// Convert conversation messages to Chat Completions message objects.
pub fn convert_messages(messages: &[ModelMessage]) -> Vec<Value> {
    let mut api_messages = Vec::new();

    for message in messages {
        match message.role {
            Role::System => {
                api_messages.push(json!({"role": "system", "content": message.text()}));
            }
            Role::User => {
                api_messages.push(json!({"role": "user", "content": message.text()}));
            }
            Role::Assistant => {
                let mut msg = json!({"role": "assistant"});
                let text = message.text();
                if !text.is_empty() {
                    msg["content"] = Value::String(text);
                }
                let calls: Vec<Value> = message
                    .tool_calls()
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": call.name,
                                "arguments": call.arguments.to_string(),
                            },
                        })
                    })
                    .collect();
                if !calls.is_empty() {
                    msg["tool_calls"] = Value::Array(calls);
                }
                api_messages.push(msg);
            }
            Role::Tool => {
                for block in &message.content {
                    if let Content::ToolResult {
                        tool_use_id,
                        output,
                        ..
                    } = block
                    {
                        api_messages.push(json!({
                            "role": "tool",
                            "tool_call_id": tool_use_id,
                            "content": output,
                        }));
                    }
                }
            }
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
    let mut api_messages = Vec::new();
    if !system_prompt.is_empty() {
        api_messages.push(json!({"role": "system", "content": system_prompt}));
    }
    api_messages.extend(convert_messages(messages));

    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": api_messages,
    });

    if !tools.is_empty() {
        let tool_defs: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    },
                })
            })
            .collect();
        body["tools"] = Value::Array(tool_defs);
    }

    if stream {
        body["stream"] = json!(true);
        body["stream_options"] = json!({"include_usage": true});
    }

    body
}

/// Parse a complete Chat Completions response.
pub fn parse_response(json: &Value) -> (ModelMessage, Usage) {
    let message = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|choice| choice.get("message"));

    let mut content = Vec::new();

    if let Some(text) = message
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
    {
        if !text.is_empty() {
            content.push(Content::Text {
                text: text.to_string(),
            });
        }
    }

    if let Some(calls) = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(|c| c.as_array())
    {
        for call in calls {
            let function = call.get("function");
            let arguments = function
                .and_then(|f| f.get("arguments"))
                .and_then(|a| a.as_str())
                .map(parse_arguments)
                .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
            content.push(Content::ToolUse {
                id: call
                    .get("id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                name: function
                    .and_then(|f| f.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                input: arguments,
            });
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

fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(serde_json::Map::new());
    }
    serde_json::from_str(raw).unwrap_or(Value::Object(serde_json::Map::new()))
}

fn parse_usage(value: Option<&Value>) -> Usage {
    let Some(value) = value else {
        return Usage::default();
    };
    Usage {
        input_tokens: value
            .get("prompt_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize,
        output_tokens: value
            .get("completion_tokens")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize,
    }
}

/// Incremental SSE parser for the Chat Completions stream.
///
/// Tool calls are assembled per index from fragmented `tool_calls` deltas
/// and flushed when the stream finishes.
#[derive(Default)]
pub struct SseParser {
    pending_calls: Vec<PendingCall>,
    usage: Usage,
    flushed: bool,
}

#[derive(Default)]
struct PendingCall {
    id: String,
    name: String,
    arguments: String,
    announced: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one SSE `data:` payload; returns the stream parts it produced.
    pub fn feed(&mut self, data: &str) -> Vec<StreamPart> {
        if data == "[DONE]" {
            return self.finish();
        }

        let Ok(event) = serde_json::from_str::<Value>(data) else {
            return Vec::new();
        };

        let mut parts = Vec::new();

        if let Some(usage) = event.get("usage") {
            if !usage.is_null() {
                self.usage = parse_usage(Some(usage));
            }
        }

        let Some(choice) = event
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|arr| arr.first())
        else {
            return parts;
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
                if !text.is_empty() {
                    parts.push(StreamPart::TextDelta {
                        delta: text.to_string(),
                    });
                }
            }

            if let Some(calls) = delta.get("tool_calls").and_then(|c| c.as_array()) {
                for call in calls {
                    let index = call.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
                    while self.pending_calls.len() <= index {
                        self.pending_calls.push(PendingCall::default());
                    }
                    let pending = &mut self.pending_calls[index];

                    if let Some(id) = call.get("id").and_then(|v| v.as_str()) {
                        pending.id.push_str(id);
                    }
                    if let Some(function) = call.get("function") {
                        if let Some(name) = function.get("name").and_then(|v| v.as_str()) {
                            pending.name.push_str(name);
                        }
                        if let Some(args) = function.get("arguments").and_then(|v| v.as_str()) {
                            pending.arguments.push_str(args);
                        }
                    }
                    // The id and name deltas can arrive in either order;
                    // announce only once both are in hand.
                    if !pending.announced && !pending.id.is_empty() && !pending.name.is_empty() {
                        pending.announced = true;
                        parts.push(StreamPart::ToolCallStart {
                            id: pending.id.clone(),
                            name: pending.name.clone(),
                        });
                    }
                }
            }
        }

        if choice
            .get("finish_reason")
            .map(|r| !r.is_null())
            .unwrap_or(false)
        {
            parts.extend(self.flush_calls());
        }

        parts
    }

    fn flush_calls(&mut self) -> Vec<StreamPart> {
        let mut parts = Vec::new();
        for pending in self.pending_calls.drain(..) {
            if pending.name.is_empty() {
                continue;
            }
            // An endpoint that never sent an id still gets a start event,
            // just a late one.
            if !pending.announced {
                parts.push(StreamPart::ToolCallStart {
                    id: pending.id.clone(),
                    name: pending.name.clone(),
                });
            }
            parts.push(StreamPart::ToolCallComplete {
                tool_call: ToolCall {
                    id: pending.id,
                    name: pending.name,
                    arguments: parse_arguments(&pending.arguments),
                },
            });
        }
        parts
    }

    fn finish(&mut self) -> Vec<StreamPart> {
        if self.flushed {
            return Vec::new();
        }
        self.flushed = true;

        let mut parts = self.flush_calls();
        parts.push(StreamPart::Usage { usage: self.usage });
        parts.push(StreamPart::Done);
        parts
    }
}
