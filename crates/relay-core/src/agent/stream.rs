//! Stream consumption and tool-call detection
//!
//! Consumes a model stream, forwarding text deltas as loop events while
//! watching for signs that the model is making a tool call. Providers differ
//! in how reliably tool calls appear in streams, so detection is a
//! per-provider strategy:
//!
//! - Anthropic models often narrate before structured blocks arrive, so
//!   narrative cues count as detection.
//! - OpenAI-style providers emit structured tool-call deltas early; the
//!   structured events alone are trusted.
//! - Ollama models sometimes emit tool calls as plain text, so text is held
//!   back until enough has arrived to rule a tool call out.
//!
//! Deltas are buffered until the strategy rules out a tool call; this keeps
//! suppressed tool-call narration off the screen without ever needing to
//! un-print text.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::model::{StreamPart, ToolCall, Usage};

use super::loop_events::LoopEvent;

const ANTHROPIC_TOOL_CUES: &[&str] = &[
    "I'll use the",
    "Let me use",
    "I need to use",
    "<function_calls>",
];

/// How much narrative text rules out an Anthropic tool-call cue.
const ANTHROPIC_PLAIN_THRESHOLD: usize = 120;

/// Chunk and length thresholds before trusting an Ollama stream as plain text.
const CONSERVATIVE_MIN_CHUNKS: usize = 5;
const CONSERVATIVE_MIN_CHARS: usize = 50;

/// Per-provider heuristic for spotting tool calls in a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionStrategy {
    /// Narrative cues plus structured events.
    Anthropic,
    /// Structured events only; text is trusted immediately.
    Structured,
    /// Hold text until volume rules a textual tool call out.
    Conservative,
    /// Trust text immediately, detect on structured events only.
    Default,
}

impl DetectionStrategy {
    pub fn for_provider(provider: &str) -> Self {
        match provider {
            "anthropic" => DetectionStrategy::Anthropic,
            "openai" | "google" => DetectionStrategy::Structured,
            "ollama" => DetectionStrategy::Conservative,
            _ => DetectionStrategy::Default,
        }
    }

    fn assess(&self, text: &str, chunks: usize) -> Verdict {
        match self {
            DetectionStrategy::Anthropic => {
                if ANTHROPIC_TOOL_CUES.iter().any(|cue| text.contains(cue)) {
                    Verdict::ToolCall
                } else if text.len() >= ANTHROPIC_PLAIN_THRESHOLD {
                    Verdict::Plain
                } else {
                    Verdict::Undecided
                }
            }
            DetectionStrategy::Conservative => {
                if chunks > CONSERVATIVE_MIN_CHUNKS && text.len() > CONSERVATIVE_MIN_CHARS {
                    Verdict::Plain
                } else {
                    Verdict::Undecided
                }
            }
            DetectionStrategy::Structured | DetectionStrategy::Default => Verdict::Plain,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Undecided,
    ToolCall,
    Plain,
}

/// Everything gathered from one stream.
#[derive(Debug, Default)]
pub struct StreamOutcome {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Option<Usage>,
    /// The strategy saw tool-call intent (narrative or structured).
    pub detected_tool_intent: bool,
    /// Whether any deltas were forwarded to the consumer.
    pub forwarded: bool,
    /// Mid-stream failure; accumulated text must be treated as garbage.
    pub error: Option<String>,
    pub cancelled: bool,
}

/// Drain a stream, forwarding text per the detection strategy.
pub async fn consume(
    mut rx: mpsc::UnboundedReceiver<StreamPart>,
    strategy: DetectionStrategy,
    event_tx: &mpsc::UnboundedSender<LoopEvent>,
    cancel: &CancellationToken,
) -> StreamOutcome {
    let mut outcome = StreamOutcome::default();
    let mut pending = String::new();
    let mut chunks = 0usize;
    let mut verdict = Verdict::Undecided;

    loop {
        let part = tokio::select! {
            _ = cancel.cancelled() => {
                outcome.cancelled = true;
                return outcome;
            }
            part = rx.recv() => match part {
                Some(part) => part,
                None => break,
            },
        };

        match part {
            StreamPart::TextDelta { delta } => {
                chunks += 1;
                outcome.text.push_str(&delta);

                match verdict {
                    Verdict::Plain => {
                        outcome.forwarded = true;
                        let _ = event_tx.send(LoopEvent::TextDelta { delta });
                    }
                    Verdict::ToolCall => {}
                    Verdict::Undecided => {
                        pending.push_str(&delta);
                        verdict = strategy.assess(&outcome.text, chunks);
                        match verdict {
                            Verdict::Plain => {
                                outcome.forwarded = true;
                                let _ = event_tx.send(LoopEvent::TextDelta {
                                    delta: std::mem::take(&mut pending),
                                });
                            }
                            Verdict::ToolCall => {
                                outcome.detected_tool_intent = true;
                                pending.clear();
                            }
                            Verdict::Undecided => {}
                        }
                    }
                }
            }
            StreamPart::ToolCallStart { .. } => {
                // Structured evidence beats any heuristic.
                outcome.detected_tool_intent = true;
                verdict = Verdict::ToolCall;
                pending.clear();
            }
            StreamPart::ToolCallComplete { tool_call } => {
                outcome.detected_tool_intent = true;
                verdict = Verdict::ToolCall;
                outcome.tool_calls.push(tool_call);
            }
            StreamPart::Usage { usage } => {
                outcome.usage = Some(usage);
            }
            StreamPart::Error { error } => {
                outcome.error = Some(error);
                return outcome;
            }
            StreamPart::Done => break,
        }
    }

    // Stream ended while still undecided: the held text is plain after all.
    if verdict == Verdict::Undecided && !pending.is_empty() {
        outcome.forwarded = true;
        let _ = event_tx.send(LoopEvent::TextDelta { delta: pending });
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts_channel(parts: Vec<StreamPart>) -> mpsc::UnboundedReceiver<StreamPart> {
        let (tx, rx) = mpsc::unbounded_channel();
        for part in parts {
            tx.send(part).unwrap();
        }
        rx
    }

    fn delta(text: &str) -> StreamPart {
        StreamPart::TextDelta {
            delta: text.to_string(),
        }
    }

    async fn run(parts: Vec<StreamPart>, strategy: DetectionStrategy) -> (StreamOutcome, Vec<LoopEvent>) {
        let rx = parts_channel(parts);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let outcome = consume(rx, strategy, &event_tx, &cancel).await;
        drop(event_tx);
        let mut events = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            events.push(event);
        }
        (outcome, events)
    }

    fn forwarded_text(events: &[LoopEvent]) -> String {
        events
            .iter()
            .filter_map(|e| match e {
                LoopEvent::TextDelta { delta } => Some(delta.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn default_strategy_forwards_immediately() {
        let (outcome, events) = run(
            vec![delta("hello "), delta("world"), StreamPart::Done],
            DetectionStrategy::Default,
        )
        .await;
        assert_eq!(outcome.text, "hello world");
        assert!(!outcome.detected_tool_intent);
        assert_eq!(forwarded_text(&events), "hello world");
    }

    #[tokio::test]
    async fn anthropic_cue_suppresses_narration() {
        let (outcome, events) = run(
            vec![
                delta("I'll use the "),
                delta("bash tool to check."),
                StreamPart::Done,
            ],
            DetectionStrategy::Anthropic,
        )
        .await;
        assert!(outcome.detected_tool_intent);
        assert!(outcome.tool_calls.is_empty());
        assert!(forwarded_text(&events).is_empty());
    }

    #[tokio::test]
    async fn anthropic_plain_text_flushes_after_threshold() {
        let long = "a".repeat(150);
        let (outcome, events) = run(
            vec![delta(&long), StreamPart::Done],
            DetectionStrategy::Anthropic,
        )
        .await;
        assert!(!outcome.detected_tool_intent);
        assert_eq!(forwarded_text(&events), long);
    }

    #[tokio::test]
    async fn short_undecided_text_flushes_at_end() {
        let (outcome, events) = run(
            vec![delta("Done."), StreamPart::Done],
            DetectionStrategy::Anthropic,
        )
        .await;
        assert!(!outcome.detected_tool_intent);
        assert_eq!(forwarded_text(&events), "Done.");
        assert!(outcome.forwarded);
    }

    #[tokio::test]
    async fn structured_tool_call_is_collected() {
        let call = ToolCall {
            id: "c1".into(),
            name: "bash".into(),
            arguments: serde_json::json!({"command": "ls"}),
        };
        let (outcome, events) = run(
            vec![
                StreamPart::ToolCallStart {
                    id: "c1".into(),
                    name: "bash".into(),
                },
                StreamPart::ToolCallComplete {
                    tool_call: call.clone(),
                },
                StreamPart::Done,
            ],
            DetectionStrategy::Structured,
        )
        .await;
        assert!(outcome.detected_tool_intent);
        assert_eq!(outcome.tool_calls, vec![call]);
        assert!(forwarded_text(&events).is_empty());
    }

    #[tokio::test]
    async fn conservative_holds_short_streams() {
        // 3 chunks, under the volume threshold: nothing forwarded mid-stream,
        // everything flushed at the end.
        let (outcome, events) = run(
            vec![delta("short"), delta(" answer"), delta("."), StreamPart::Done],
            DetectionStrategy::Conservative,
        )
        .await;
        assert!(!outcome.detected_tool_intent);
        assert_eq!(forwarded_text(&events), "short answer.");
        assert_eq!(outcome.text, "short answer.");
    }

    #[tokio::test]
    async fn conservative_flushes_once_volume_clears() {
        let parts: Vec<_> = (0..8).map(|_| delta("0123456789")).chain([StreamPart::Done]).collect();
        let (outcome, events) = run(parts, DetectionStrategy::Conservative).await;
        assert!(!outcome.detected_tool_intent);
        assert_eq!(forwarded_text(&events), outcome.text);
    }

    #[tokio::test]
    async fn mid_stream_error_is_reported() {
        let (outcome, _) = run(
            vec![
                delta("partial"),
                StreamPart::Error {
                    error: "connection reset".into(),
                },
            ],
            DetectionStrategy::Default,
        )
        .await;
        assert_eq!(outcome.error.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn cancellation_stops_consumption() {
        let (_tx, rx) = mpsc::unbounded_channel::<StreamPart>();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = consume(rx, DetectionStrategy::Default, &event_tx, &cancel).await;
        assert!(outcome.cancelled);
    }

    #[test]
    fn strategy_selection_by_provider() {
        assert_eq!(
            DetectionStrategy::for_provider("anthropic"),
            DetectionStrategy::Anthropic
        );
        assert_eq!(
            DetectionStrategy::for_provider("openai"),
            DetectionStrategy::Structured
        );
        assert_eq!(
            DetectionStrategy::for_provider("ollama"),
            DetectionStrategy::Conservative
        );
        assert_eq!(
            DetectionStrategy::for_provider("deepseek"),
            DetectionStrategy::Default
        );
    }
}
