//! Conversation window pruning
//!
//! Long conversations are pruned to a bounded suffix before each provider
//! call so requests stay within context limits. Truncation can split a tool
//! exchange, leaving a `tool_use` without its `tool_result` or vice versa;
//! providers reject such transcripts, so orphaned halves are dropped too.
//!
//! Pruning is idempotent: pruning an already-pruned window returns it
//! unchanged.

use std::collections::HashSet;

use crate::model::{Content, ModelMessage};

/// Prune a conversation to at most `window` messages, then repair tool
/// pairing broken by the cut.
///
/// A `window` of 0 disables pruning. A conversation within budget is
/// returned unchanged; repair only applies to a truncated suffix. System
/// messages are not given special treatment here; the system prompt lives
/// outside the transcript.
pub fn prune(messages: Vec<ModelMessage>, window: usize) -> Vec<ModelMessage> {
    if window == 0 || messages.len() <= window {
        return messages;
    }

    let start = messages.len() - window;
    repair_tool_pairing(messages.into_iter().skip(start).collect())
}

/// Drop tool_use blocks without a matching tool_result and tool_result
/// blocks without a matching tool_use, then drop messages left empty.
fn repair_tool_pairing(messages: Vec<ModelMessage>) -> Vec<ModelMessage> {
    let mut use_ids = HashSet::new();
    let mut result_ids = HashSet::new();

    for message in &messages {
        for block in &message.content {
            match block {
                Content::ToolUse { id, .. } => {
                    use_ids.insert(id.clone());
                }
                Content::ToolResult { tool_use_id, .. } => {
                    result_ids.insert(tool_use_id.clone());
                }
                Content::Text { .. } => {}
            }
        }
    }

    messages
        .into_iter()
        .filter_map(|mut message| {
            let had_text = message
                .content
                .iter()
                .any(|block| matches!(block, Content::Text { .. }));

            message.content.retain(|block| match block {
                Content::ToolUse { id, .. } => result_ids.contains(id),
                Content::ToolResult { tool_use_id, .. } => use_ids.contains(tool_use_id),
                Content::Text { .. } => true,
            });

            // A message that only carried a now-orphaned block is dropped;
            // one that still has text (or kept blocks) stays.
            if message.content.is_empty() && !had_text {
                None
            } else {
                Some(message)
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{assistant_message, Role, ToolCall};

    fn user(text: &str) -> ModelMessage {
        ModelMessage::user(text)
    }

    fn assistant_with_tool(text: &str, call_id: &str) -> ModelMessage {
        assistant_message(
            text,
            &[ToolCall {
                id: call_id.to_string(),
                name: "bash".to_string(),
                arguments: serde_json::json!({}),
            }],
        )
    }

    fn tool_result(call_id: &str, output: &str) -> ModelMessage {
        ModelMessage::tool_result(call_id, output)
    }

    #[test]
    fn short_conversations_pass_through() {
        let messages = vec![user("hi"), ModelMessage::assistant("hello")];
        let pruned = prune(messages.clone(), 10);
        assert_eq!(pruned.len(), 2);
        assert_eq!(pruned, messages);
    }

    #[test]
    fn window_zero_disables_truncation() {
        let messages: Vec<_> = (0..50).map(|i| user(&format!("m{i}"))).collect();
        assert_eq!(prune(messages, 0).len(), 50);
    }

    #[test]
    fn within_budget_returns_input_unchanged() {
        // No repair without a cut, even when a tool_use has no result yet.
        let messages = vec![
            user("run ls"),
            assistant_with_tool("running", "call-1"),
        ];
        assert_eq!(prune(messages.clone(), 10), messages);
        assert_eq!(prune(messages.clone(), 0), messages);
    }

    #[test]
    fn keeps_most_recent_suffix() {
        let messages: Vec<_> = (0..10).map(|i| user(&format!("m{i}"))).collect();
        let pruned = prune(messages, 3);
        assert_eq!(pruned.len(), 3);
        assert_eq!(pruned[0].text(), "m7");
        assert_eq!(pruned[2].text(), "m9");
    }

    #[test]
    fn drops_orphaned_tool_result_after_cut() {
        // Window cuts between the assistant tool_use and its result.
        let messages = vec![
            user("old"),
            assistant_with_tool("running", "call-1"),
            tool_result("call-1", "done"),
            user("next"),
        ];
        let pruned = prune(messages, 2);
        // tool_result for call-1 lost its tool_use and is dropped.
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].text(), "next");
    }

    #[test]
    fn drops_orphaned_tool_use_but_keeps_text() {
        let messages = vec![
            user("old"),
            user("older still"),
            assistant_with_tool("let me check", "call-1"),
            user("never mind"),
        ];
        let pruned = prune(messages, 2);
        assert_eq!(pruned.len(), 2);
        // The orphaned tool_use block is gone; the text survives.
        assert_eq!(pruned[0].text(), "let me check");
        assert!(pruned[0].tool_calls().is_empty());
    }

    #[test]
    fn drops_assistant_message_with_only_orphaned_tool_use() {
        let messages = vec![
            user("old"),
            assistant_with_tool("", "call-1"),
            user("hello"),
        ];
        let pruned = prune(messages, 2);
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].role, Role::User);
    }

    #[test]
    fn paired_tool_exchange_survives_intact() {
        let messages = vec![
            user("run ls"),
            assistant_with_tool("running", "call-1"),
            tool_result("call-1", "file.txt"),
            ModelMessage::assistant("done"),
        ];
        let pruned = prune(messages.clone(), 10);
        assert_eq!(pruned, messages);
    }

    #[test]
    fn pruning_is_idempotent() {
        let messages = vec![
            user("old"),
            assistant_with_tool("running", "call-1"),
            tool_result("call-1", "done"),
            user("next"),
            ModelMessage::assistant("sure"),
        ];
        let once = prune(messages, 3);
        let twice = prune(once.clone(), 3);
        assert_eq!(once, twice);
    }
}
