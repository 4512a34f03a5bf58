//! Interactive session
//!
//! Owns the conversation across prompts and renders loop events to the
//! terminal. Each prompt spawns a fresh `AgentLoop`; the transcript comes
//! back through the loop's join handle and is pruned between turns.

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Result;
use relay_core::agent::{
    history, AgentConfig, AgentLoop, AgentServices, CancelListener, LoopEvent, LoopInput,
};
use relay_core::hooks::HookEngine;
use relay_core::model::{ModelClient, ModelMessage};
use relay_core::toolserver::ToolHost;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tracing::debug;

pub struct Session {
    pub client: Arc<dyn ModelClient>,
    pub tools: Arc<dyn ToolHost>,
    pub hooks: Arc<HookEngine>,
    pub cancel_listener: Option<Arc<dyn CancelListener>>,
    pub config: AgentConfig,
    conversation: Vec<ModelMessage>,
    stdin: Lines<BufReader<Stdin>>,
}

impl Session {
    pub fn new(
        client: Arc<dyn ModelClient>,
        tools: Arc<dyn ToolHost>,
        hooks: Arc<HookEngine>,
        cancel_listener: Option<Arc<dyn CancelListener>>,
        config: AgentConfig,
    ) -> Self {
        Self {
            client,
            tools,
            hooks,
            cancel_listener,
            config,
            conversation: Vec::new(),
            stdin: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    /// Read prompts until EOF or an exit command.
    pub async fn repl(&mut self) -> Result<()> {
        loop {
            print!("> ");
            std::io::stdout().flush()?;

            let Some(line) = self.stdin.next_line().await? else {
                break;
            };
            let prompt = line.trim();
            if prompt.is_empty() {
                continue;
            }
            if prompt == "exit" || prompt == "quit" {
                break;
            }

            self.run_prompt(prompt).await?;
        }
        Ok(())
    }

    /// Run one prompt to completion, rendering events as they arrive.
    pub async fn run_prompt(&mut self, prompt: &str) -> Result<()> {
        self.conversation.push(ModelMessage::user(prompt));

        let services = AgentServices {
            client: Arc::clone(&self.client),
            tools: Arc::clone(&self.tools),
            hooks: Arc::clone(&self.hooks),
            cancel_listener: self.cancel_listener.clone(),
        };
        let agent = AgentLoop::new(services, self.config.clone());
        let (mut events, inputs, handle) =
            agent.run(std::mem::take(&mut self.conversation));

        // While the Esc listener holds the terminal in raw mode, bare \n
        // does not return the carriage.
        let raw_output = self.cancel_listener.is_some();
        let mut streamed_this_step = false;

        while let Some(event) = events.recv().await {
            match event {
                LoopEvent::StepStarted { step } => {
                    debug!(step, "Step started");
                    streamed_this_step = false;
                }
                LoopEvent::TextDelta { delta } => {
                    streamed_this_step = true;
                    write_text(&delta, raw_output);
                }
                LoopEvent::StreamReset => {
                    streamed_this_step = false;
                    write_text("\n", raw_output);
                }
                LoopEvent::TextComplete { text } => {
                    if streamed_this_step {
                        write_text("\n", raw_output);
                    } else {
                        write_text(&text, raw_output);
                        write_text("\n", raw_output);
                    }
                }
                LoopEvent::ToolCallStarted {
                    name, arguments, ..
                } => {
                    write_text(&format!("[{name} {}]\n", truncate(&arguments, 120)), raw_output);
                }
                LoopEvent::ToolCallCompleted {
                    name,
                    output,
                    is_error,
                    ..
                } => {
                    if is_error {
                        write_text(
                            &format!("[{name} failed: {}]\n", truncate(&output, 200)),
                            raw_output,
                        );
                    } else {
                        debug!(tool = %name, "Tool call completed");
                    }
                }
                LoopEvent::ApprovalRequest {
                    id,
                    name,
                    arguments,
                } => {
                    let approved = self.ask_approval(&name, &arguments).await?;
                    let _ = inputs.send(LoopInput::Approval { id, approved });
                }
                LoopEvent::Usage { usage } => {
                    debug!(
                        input_tokens = usage.input_tokens,
                        output_tokens = usage.output_tokens,
                        "Usage"
                    );
                }
                LoopEvent::Cancelled => {
                    write_text("\n(cancelled)\n", raw_output);
                }
                LoopEvent::Error { error } => {
                    eprintln!("error: {error}");
                }
                LoopEvent::Done { .. } => {}
            }
        }

        // Bound the transcript between turns as well as per request.
        self.conversation = history::prune(handle.await?, self.config.message_window);
        Ok(())
    }

    async fn ask_approval(&mut self, name: &str, arguments: &str) -> Result<bool> {
        print!("Run {name} {}? [y/N] ", truncate(arguments, 120));
        std::io::stdout().flush()?;
        let answer = self.stdin.next_line().await?.unwrap_or_default();
        Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
    }
}

fn write_text(text: &str, raw_output: bool) {
    if raw_output {
        print!("{}", text.replace('\n', "\r\n"));
    } else {
        print!("{text}");
    }
    let _ = std::io::stdout().flush();
}

fn truncate(text: &str, max: usize) -> &str {
    let mut end = max.min(text.len());
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}
