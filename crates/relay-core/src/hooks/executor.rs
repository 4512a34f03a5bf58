//! Hook execution engine
//!
//! Runs configured hook commands as `sh -c` subprocesses with a JSON payload
//! on stdin, interprets their exit codes, and merges their outputs. Hook
//! failures never surface as engine errors; a broken user script must not
//! take down the conversation loop.
//!
//! Exit code contract:
//! - 0: success; stdout may carry a JSON [`HookOutput`]
//! - 2: block; stderr becomes the block reason and later hooks are skipped
//! - anything else (including timeout and spawn failure): logged, ignored

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::config::HookConfig;
use super::schemas::{CommonInput, HookOutput, HookPayload};

const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Session-level identity included in every hook payload.
#[derive(Debug, Clone)]
pub struct HookSession {
    pub session_id: String,
    pub cwd: PathBuf,
    pub model: String,
    pub interactive: bool,
}

/// Executes user hooks for lifecycle events.
pub struct HookEngine {
    config: HookConfig,
    session: HookSession,
}

impl HookEngine {
    pub fn new(config: HookConfig, session: HookSession) -> Self {
        Self { config, session }
    }

    pub fn has_hooks(&self) -> bool {
        !self.config.is_empty()
    }

    /// Run every hook selected for the payload's event and merge their
    /// outputs. Infallible by design; individual hook failures degrade to
    /// empty outputs.
    pub async fn execute(&self, payload: &HookPayload) -> HookOutput {
        let event = payload.event();
        let entries = self.config.entries_for(event, payload.tool_name());
        if entries.is_empty() {
            return HookOutput::default();
        }

        let common = CommonInput {
            session_id: self.session.session_id.clone(),
            cwd: self.session.cwd.display().to_string(),
            hook_event_name: event.name().to_string(),
            timestamp: Utc::now().timestamp(),
            model: self.session.model.clone(),
            interactive: self.session.interactive,
        };
        let stdin_json = payload.to_stdin_json(&common);

        let mut merged = HookOutput::default();
        for entry in entries {
            if entry.entry_type != "command" {
                warn!(
                    event = %event,
                    entry_type = %entry.entry_type,
                    "Skipping hook entry with unsupported type"
                );
                continue;
            }

            let timeout = Duration::from_secs(if entry.timeout > 0 {
                entry.timeout
            } else {
                DEFAULT_TIMEOUT_SECS
            });

            let output = self
                .run_command(&entry.command, &stdin_json, timeout, event.name())
                .await;

            let halt = output.is_block() || output.continue_ == Some(false);
            merge_outputs(&mut merged, output);
            if halt {
                // A block or hard stop preempts any remaining hooks for this
                // event, so no later hook can overrule it.
                break;
            }
        }
        merged
    }

    async fn run_command(
        &self,
        command: &str,
        stdin_json: &serde_json::Value,
        timeout: Duration,
        event_name: &str,
    ) -> HookOutput {
        debug!(event = event_name, command = command, "Running hook");

        let mut child = match Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.session.cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(event = event_name, command = command, "Hook spawn failed: {e}");
                return HookOutput::default();
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            let payload = stdin_json.to_string();
            // A hook that never reads stdin closes the pipe; not an error.
            let _ = stdin.write_all(payload.as_bytes()).await;
            drop(stdin);
        }

        let result = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(event = event_name, command = command, "Hook wait failed: {e}");
                return HookOutput::default();
            }
            Err(_) => {
                warn!(
                    event = event_name,
                    command = command,
                    timeout_secs = timeout.as_secs(),
                    "Hook timed out"
                );
                return HookOutput::default();
            }
        };

        match result.status.code() {
            Some(0) => {
                let stdout = String::from_utf8_lossy(&result.stdout);
                let trimmed = stdout.trim();
                if trimmed.is_empty() {
                    return HookOutput::default();
                }
                match serde_json::from_str::<HookOutput>(trimmed) {
                    Ok(output) => output,
                    Err(e) => {
                        debug!(
                            event = event_name,
                            command = command,
                            "Hook stdout is not structured output, ignoring: {e}"
                        );
                        HookOutput::default()
                    }
                }
            }
            Some(2) => {
                let stderr = String::from_utf8_lossy(&result.stderr);
                HookOutput::blocked(stderr.trim().to_string())
            }
            code => {
                warn!(
                    event = event_name,
                    command = command,
                    exit_code = ?code,
                    "Hook exited nonzero, ignoring"
                );
                HookOutput::default()
            }
        }
    }
}

/// Fold one hook's output into the running merge.
///
/// Later non-empty values override earlier ones, except `context` and
/// `feedback` which concatenate, and `suppress_output` which latches on.
fn merge_outputs(merged: &mut HookOutput, next: HookOutput) {
    if next.continue_.is_some() {
        merged.continue_ = next.continue_;
    }
    if !next.stop_reason.is_empty() {
        merged.stop_reason = next.stop_reason;
    }
    merged.suppress_output |= next.suppress_output;
    if !next.decision.is_empty() {
        merged.decision = next.decision;
    }
    if !next.reason.is_empty() {
        merged.reason = next.reason;
    }
    if !next.system_prompt.is_empty() {
        merged.system_prompt = next.system_prompt;
    }
    if !next.modify_output.is_empty() {
        merged.modify_output = next.modify_output;
    }
    if !next.feedback.is_empty() {
        if merged.feedback.is_empty() {
            merged.feedback = next.feedback;
        } else {
            merged.feedback.push('\n');
            merged.feedback.push_str(&next.feedback);
        }
    }
    if !next.context.is_empty() {
        if merged.context.is_empty() {
            merged.context = next.context;
        } else {
            merged.context.push('\n');
            merged.context.push_str(&next.context);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::config::{load_hook_config, HookEntry, HookMatcher};
    use crate::hooks::events::HookEvent;
    use std::collections::HashMap;

    fn session() -> HookSession {
        HookSession {
            session_id: "test-session".into(),
            cwd: std::env::temp_dir(),
            model: "anthropic:claude-sonnet-4-5".into(),
            interactive: false,
        }
    }

    fn engine_with(event: HookEvent, matcher: &str, command: &str) -> HookEngine {
        let config = HookConfig {
            hooks: HashMap::from([(
                event,
                vec![HookMatcher {
                    matcher: matcher.into(),
                    hooks: vec![HookEntry {
                        entry_type: "command".into(),
                        command: command.into(),
                        timeout: 5,
                    }],
                }],
            )]),
        };
        HookEngine::new(config, session())
    }

    fn pre_tool_payload(tool: &str) -> HookPayload {
        HookPayload::PreToolUse {
            tool_name: tool.into(),
            tool_input: serde_json::json!({"command": "ls"}),
        }
    }

    #[tokio::test]
    async fn exit_zero_json_stdout_becomes_output() {
        let engine = engine_with(
            HookEvent::PreToolUse,
            "bash",
            r#"echo '{"decision":"approve","reason":"fine"}'"#,
        );
        let output = engine.execute(&pre_tool_payload("bash")).await;
        assert_eq!(output.decision, "approve");
        assert_eq!(output.reason, "fine");
    }

    #[tokio::test]
    async fn exit_two_blocks_with_stderr_reason() {
        let engine = engine_with(
            HookEvent::PreToolUse,
            "",
            "echo 'dangerous command' >&2; exit 2",
        );
        let output = engine.execute(&pre_tool_payload("bash")).await;
        assert!(output.is_block());
        assert_eq!(output.reason, "dangerous command");
        assert_eq!(output.continue_, Some(false));
    }

    #[tokio::test]
    async fn other_nonzero_exit_is_ignored() {
        let engine = engine_with(HookEvent::PreToolUse, "", "exit 1");
        let output = engine.execute(&pre_tool_payload("bash")).await;
        assert_eq!(output, HookOutput::default());
    }

    #[tokio::test]
    async fn spawn_failure_is_ignored() {
        let engine = engine_with(HookEvent::PreToolUse, "", "/nonexistent/binary/path");
        let output = engine.execute(&pre_tool_payload("bash")).await;
        assert_eq!(output, HookOutput::default());
    }

    #[tokio::test]
    async fn timeout_is_ignored() {
        let config = HookConfig {
            hooks: HashMap::from([(
                HookEvent::PreToolUse,
                vec![HookMatcher {
                    matcher: String::new(),
                    hooks: vec![HookEntry {
                        entry_type: "command".into(),
                        command: "sleep 10".into(),
                        timeout: 1,
                    }],
                }],
            )]),
        };
        let engine = HookEngine::new(config, session());
        let output = engine.execute(&pre_tool_payload("bash")).await;
        assert_eq!(output, HookOutput::default());
    }

    #[tokio::test]
    async fn non_matching_tool_runs_nothing() {
        let engine = engine_with(HookEvent::PreToolUse, "^fetch$", "exit 2");
        let output = engine.execute(&pre_tool_payload("bash")).await;
        assert!(!output.is_block());
    }

    #[tokio::test]
    async fn hook_receives_payload_on_stdin() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("stdin.json");
        let engine = engine_with(
            HookEvent::PreToolUse,
            "bash",
            &format!("cat > {}", capture.display()),
        );
        let _ = engine.execute(&pre_tool_payload("bash")).await;

        let captured: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&capture).unwrap()).unwrap();
        assert_eq!(captured["hook_event_name"], "PreToolUse");
        assert_eq!(captured["tool_name"], "bash");
        assert_eq!(captured["session_id"], "test-session");
        assert_eq!(captured["tool_input"]["command"], "ls");
    }

    #[tokio::test]
    async fn block_halts_remaining_hooks() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let config = HookConfig {
            hooks: HashMap::from([(
                HookEvent::PreToolUse,
                vec![HookMatcher {
                    matcher: String::new(),
                    hooks: vec![
                        HookEntry {
                            entry_type: "command".into(),
                            command: "echo blocked >&2; exit 2".into(),
                            timeout: 5,
                        },
                        HookEntry {
                            entry_type: "command".into(),
                            command: format!("touch {}", marker.display()),
                            timeout: 5,
                        },
                    ],
                }],
            )]),
        };
        let engine = HookEngine::new(config, session());
        let output = engine.execute(&pre_tool_payload("bash")).await;
        assert!(output.is_block());
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn structured_block_halts_and_is_not_overridden() {
        // A hook can block via JSON on a clean exit, not only via exit 2;
        // a later approve must not overrule it.
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("ran");
        let config = HookConfig {
            hooks: HashMap::from([(
                HookEvent::PreToolUse,
                vec![HookMatcher {
                    matcher: String::new(),
                    hooks: vec![
                        HookEntry {
                            entry_type: "command".into(),
                            command: r#"echo '{"decision":"block","reason":"no"}'"#.into(),
                            timeout: 5,
                        },
                        HookEntry {
                            entry_type: "command".into(),
                            command: format!(
                                r#"touch {}; echo '{{"decision":"approve","reason":"yes"}}'"#,
                                marker.display()
                            ),
                            timeout: 5,
                        },
                    ],
                }],
            )]),
        };
        let engine = HookEngine::new(config, session());
        let output = engine.execute(&pre_tool_payload("bash")).await;
        assert!(output.is_block());
        assert_eq!(output.reason, "no");
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn context_and_feedback_concatenate_across_hooks() {
        let config = HookConfig {
            hooks: HashMap::from([(
                HookEvent::UserPromptSubmit,
                vec![HookMatcher {
                    matcher: String::new(),
                    hooks: vec![
                        HookEntry {
                            entry_type: "command".into(),
                            command: r#"echo '{"context":"first","decision":"approve"}'"#.into(),
                            timeout: 5,
                        },
                        HookEntry {
                            entry_type: "command".into(),
                            command: r#"echo '{"context":"second"}'"#.into(),
                            timeout: 5,
                        },
                    ],
                }],
            )]),
        };
        let engine = HookEngine::new(config, session());
        let output = engine
            .execute(&HookPayload::UserPromptSubmit {
                prompt: "hi".into(),
            })
            .await;
        assert_eq!(output.context, "first\nsecond");
        assert_eq!(output.decision, "approve");
    }

    #[tokio::test]
    async fn loads_and_runs_from_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hooks.yml");
        std::fs::write(
            &path,
            r#"
hooks:
  PostToolUse:
    - matcher: "bash"
      hooks:
        - type: command
          command: "echo '{\"modifyOutput\":\"redacted\"}'"
"#,
        )
        .unwrap();

        let config = load_hook_config(&[path]).unwrap();
        let engine = HookEngine::new(config, session());
        let output = engine
            .execute(&HookPayload::PostToolUse {
                tool_name: "bash".into(),
                tool_input: serde_json::json!({}),
                tool_response: serde_json::json!({"output": "secret"}),
            })
            .await;
        assert_eq!(output.modify_output, "redacted");
    }
}
