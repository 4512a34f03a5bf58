//! The agent loop controller
//!
//! `AgentLoop` drives one prompt to completion: generate, decide, execute
//! tools, generate again, until the model answers with plain text or the
//! step limit is hit. The CLI is a thin presentation layer over the event
//! and input channels returned by [`AgentLoop::run`].
//!
//! Failure policy: tool failures, unknown tools, and hook blocks are
//! absorbed into the transcript as error-flagged tool results so the model
//! can react to them. Only user cancellation and fatal generation errors
//! end the loop early. Cancellation leaves the transcript exactly as it was
//! before the step began.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::hooks::{HookEngine, HookPayload};
use crate::model::{ModelClient, ModelMessage, Role};
use crate::toolserver::ToolHost;

use super::history;
use super::invoker::{CancelListener, InvokeResult, Invoker};
use super::loop_events::{LoopEvent, LoopInput};

/// Final assistant text when the loop runs out of steps. A normal
/// completion, not an error.
pub const STEP_LIMIT_MESSAGE: &str = "Maximum number of steps reached.";

const APPROVAL_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for one loop run.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub session_id: String,
    pub working_dir: PathBuf,
    pub system_prompt: String,
    /// Step limit for one run; 0 means unlimited.
    pub max_steps: usize,
    /// Conversation window in messages; 0 disables pruning.
    pub message_window: usize,
    pub streaming: bool,
    /// Ask the user before every tool call.
    pub require_approval: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            working_dir: PathBuf::new(),
            system_prompt: String::new(),
            max_steps: crate::config::DEFAULT_MAX_STEPS,
            message_window: crate::config::DEFAULT_MESSAGE_WINDOW,
            streaming: true,
            require_approval: false,
        }
    }
}

/// Shared services the loop needs.
pub struct AgentServices {
    pub client: Arc<dyn ModelClient>,
    pub tools: Arc<dyn ToolHost>,
    pub hooks: Arc<HookEngine>,
    pub cancel_listener: Option<Arc<dyn CancelListener>>,
}

pub struct AgentLoop {
    services: AgentServices,
    config: AgentConfig,
}

enum ApprovalDecision {
    Approved,
    Denied,
    Cancelled,
}

impl AgentLoop {
    pub fn new(services: AgentServices, config: AgentConfig) -> Self {
        Self { services, config }
    }

    /// Start the loop as a spawned task.
    ///
    /// Returns `(event_receiver, input_sender, transcript_handle)`. The
    /// handle resolves to the conversation including everything this run
    /// appended.
    pub fn run(
        self,
        conversation: Vec<ModelMessage>,
    ) -> (
        mpsc::UnboundedReceiver<LoopEvent>,
        mpsc::UnboundedSender<LoopInput>,
        JoinHandle<Vec<ModelMessage>>,
    ) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (input_tx, input_rx) = mpsc::unbounded_channel();

        let handle =
            tokio::spawn(async move { self.run_inner(conversation, event_tx, input_rx).await });

        (event_rx, input_tx, handle)
    }

    /// Run to completion without a consumer, for headless callers.
    ///
    /// Returns the final assistant text and the full transcript. Approval
    /// requests cannot be answered here, so `require_approval` callers must
    /// use [`AgentLoop::run`] instead.
    pub async fn run_to_completion(
        self,
        conversation: Vec<ModelMessage>,
    ) -> anyhow::Result<(String, Vec<ModelMessage>)> {
        let (mut events, _inputs, handle) = self.run(conversation);

        let mut response = String::new();
        let mut error = None;
        while let Some(event) = events.recv().await {
            match event {
                LoopEvent::Done { response: text } => response = text,
                LoopEvent::Error { error: e } => error = Some(e),
                _ => {}
            }
        }

        let transcript = handle.await?;
        match error {
            Some(e) => Err(anyhow::anyhow!(e)),
            None => Ok((response, transcript)),
        }
    }

    async fn run_inner(
        self,
        mut conversation: Vec<ModelMessage>,
        event_tx: mpsc::UnboundedSender<LoopEvent>,
        mut input_rx: mpsc::UnboundedReceiver<LoopInput>,
    ) -> Vec<ModelMessage> {
        let AgentServices {
            client,
            tools,
            hooks,
            cancel_listener,
        } = self.services;
        let config = self.config;

        // The submitted prompt runs through its hook before anything else.
        if let Some(response) =
            apply_prompt_hooks(&hooks, &mut conversation).await
        {
            let _ = event_tx.send(LoopEvent::Done { response });
            return conversation;
        }

        let mut invoker = Invoker::new(Arc::clone(&client), config.streaming);
        if let Some(listener) = cancel_listener {
            invoker = invoker.with_cancel_listener(listener);
        }

        let tool_defs = tools.tools().await;
        let mut final_text = String::new();

        let mut step = 0;
        loop {
            step += 1;
            if config.max_steps != 0 && step > config.max_steps {
                break;
            }
            let _ = event_tx.send(LoopEvent::StepStarted { step });

            // The full transcript stays intact; the provider sees a pruned view.
            let window = history::prune(conversation.clone(), config.message_window);

            let result = invoker
                .invoke(&window, &config.system_prompt, &tool_defs, &event_tx)
                .await;

            let response = match result {
                Ok(InvokeResult::Response(response)) => response,
                Ok(InvokeResult::Cancelled) => {
                    info!(session = %config.session_id, step, "Generation cancelled");
                    let _ = event_tx.send(LoopEvent::Cancelled);
                    fire_stop_hook(&hooks, &final_text, "cancelled").await;
                    return conversation;
                }
                Err(e) => {
                    warn!(session = %config.session_id, step, "Generation failed: {e}");
                    let _ = event_tx.send(LoopEvent::Error {
                        error: e.to_string(),
                    });
                    fire_stop_hook(&hooks, &final_text, "error").await;
                    return conversation;
                }
            };

            let _ = event_tx.send(LoopEvent::Usage {
                usage: response.usage,
            });

            let message = response.message;
            let text = message.text();
            let calls = message.tool_calls();

            // Appended before any tool processing so a mid-execution exit
            // still leaves a coherent transcript.
            if !message.content.is_empty() {
                conversation.push(message);
            }
            if !text.is_empty() {
                final_text = text.clone();
                let _ = event_tx.send(LoopEvent::TextComplete { text });
            }

            if calls.is_empty() {
                fire_stop_hook(&hooks, &final_text, "completed").await;
                let _ = event_tx.send(LoopEvent::Done {
                    response: final_text,
                });
                return conversation;
            }

            for (idx, call) in calls.iter().enumerate() {
                let arguments = normalize_arguments(&call.arguments);
                let rendered_args = arguments.to_string();

                let pre = hooks
                    .execute(&HookPayload::PreToolUse {
                        tool_name: call.name.clone(),
                        tool_input: arguments.clone(),
                    })
                    .await;
                if pre.is_block() {
                    let output = if pre.reason.is_empty() {
                        "Tool call blocked by hook.".to_string()
                    } else {
                        format!("Tool call blocked by hook: {}", pre.reason)
                    };
                    conversation.push(ModelMessage::tool_error(&call.id, &output));
                    let _ = event_tx.send(LoopEvent::ToolCallCompleted {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        output,
                        is_error: true,
                    });
                    continue;
                }

                if config.require_approval {
                    let _ = event_tx.send(LoopEvent::ApprovalRequest {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        arguments: rendered_args.clone(),
                    });
                    match wait_for_approval(&mut input_rx, &call.id).await {
                        ApprovalDecision::Approved => {}
                        ApprovalDecision::Denied => {
                            let output = "Tool call denied by user.".to_string();
                            conversation.push(ModelMessage::tool_error(&call.id, &output));
                            let _ = event_tx.send(LoopEvent::ToolCallCompleted {
                                id: call.id.clone(),
                                name: call.name.clone(),
                                output,
                                is_error: true,
                            });
                            continue;
                        }
                        ApprovalDecision::Cancelled => {
                            // Close out this and every remaining call so the
                            // transcript keeps its tool pairing.
                            for pending in &calls[idx..] {
                                conversation.push(ModelMessage::tool_error(
                                    &pending.id,
                                    "Cancelled by user.",
                                ));
                            }
                            let _ = event_tx.send(LoopEvent::Cancelled);
                            fire_stop_hook(&hooks, &final_text, "cancelled").await;
                            return conversation;
                        }
                    }
                }

                let _ = event_tx.send(LoopEvent::ToolCallStarted {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    arguments: rendered_args,
                });

                let (mut output, mut is_error) =
                    match tools.call(&call.name, arguments.clone()).await {
                        Ok(outcome) => (outcome.output, outcome.is_error),
                        Err(e) => {
                            debug!(tool = %call.name, "Tool call failed: {e}");
                            (format!("Error: {e}"), true)
                        }
                    };

                let post = hooks
                    .execute(&HookPayload::PostToolUse {
                        tool_name: call.name.clone(),
                        tool_input: arguments,
                        tool_response: Value::String(output.clone()),
                    })
                    .await;
                if post.is_block() {
                    is_error = true;
                    if !post.reason.is_empty() {
                        output = format!("Tool output rejected by hook: {}", post.reason);
                    }
                } else if !post.modify_output.is_empty() {
                    output = post.modify_output;
                }
                if !post.feedback.is_empty() {
                    output.push_str("\n\n");
                    output.push_str(&post.feedback);
                }

                conversation.push(if is_error {
                    ModelMessage::tool_error(&call.id, &output)
                } else {
                    ModelMessage::tool_result(&call.id, &output)
                });
                let _ = event_tx.send(LoopEvent::ToolCallCompleted {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    output,
                    is_error,
                });
            }
        }

        info!(
            session = %config.session_id,
            max_steps = config.max_steps,
            "Step limit reached"
        );
        conversation.push(ModelMessage::assistant(STEP_LIMIT_MESSAGE));
        fire_stop_hook(&hooks, STEP_LIMIT_MESSAGE, "completed").await;
        let _ = event_tx.send(LoopEvent::Done {
            response: STEP_LIMIT_MESSAGE.to_string(),
        });
        conversation
    }
}

/// Run UserPromptSubmit hooks against the trailing user message.
///
/// A block removes the prompt from the transcript and returns the reason as
/// the turn's response. Hook context is appended to the prompt text.
async fn apply_prompt_hooks(
    hooks: &HookEngine,
    conversation: &mut Vec<ModelMessage>,
) -> Option<String> {
    let prompt = match conversation.last() {
        Some(message) if message.role == Role::User => message.text(),
        _ => return None,
    };

    let output = hooks
        .execute(&HookPayload::UserPromptSubmit { prompt })
        .await;

    if output.is_block() || output.continue_ == Some(false) {
        conversation.pop();
        let reason = if output.reason.is_empty() {
            "Prompt blocked by hook.".to_string()
        } else {
            output.reason
        };
        return Some(reason);
    }

    if !output.context.is_empty() {
        if let Some(message) = conversation.last_mut() {
            let combined = format!("{}\n\n{}", message.text(), output.context);
            *message = ModelMessage::user(combined);
        }
    }
    None
}

async fn fire_stop_hook(hooks: &HookEngine, response: &str, stop_reason: &str) {
    let _ = hooks
        .execute(&HookPayload::Stop {
            response: response.to_string(),
            stop_reason: stop_reason.to_string(),
        })
        .await;
}

/// Providers occasionally emit null or non-object arguments; tools expect
/// an object.
fn normalize_arguments(arguments: &Value) -> Value {
    if arguments.is_object() {
        arguments.clone()
    } else {
        Value::Object(serde_json::Map::new())
    }
}

async fn wait_for_approval(
    input_rx: &mut mpsc::UnboundedReceiver<LoopInput>,
    call_id: &str,
) -> ApprovalDecision {
    let deadline = tokio::time::Instant::now() + APPROVAL_TIMEOUT;

    loop {
        match tokio::time::timeout_at(deadline, input_rx.recv()).await {
            Ok(Some(LoopInput::Approval { id, approved })) if id == call_id => {
                return if approved {
                    ApprovalDecision::Approved
                } else {
                    ApprovalDecision::Denied
                };
            }
            Ok(Some(LoopInput::Approval { .. })) => continue,
            Ok(Some(LoopInput::Cancel)) => return ApprovalDecision::Cancelled,
            Ok(None) | Err(_) => return ApprovalDecision::Denied,
        }
    }
}
