//! Budgeted eviction of the oldest history.
//!
//! Drops whole token-share groups from the front of the history until the
//! remainder fits a configured share of the context window, then repairs
//! referential integrity: a tool result whose originating tool-use call was
//! dropped is structurally invalid upstream and must not survive.
//!
//! Two passes by construction. The budget pass decides which groups survive
//! on token counts alone; the integrity pass needs the final kept set of
//! tool-call ids, which only exists once the group decisions are made.

use crate::chunker::split_messages_by_token_share;
use crate::estimator::TokenEstimator;
use crate::messages::Message;
use log::{debug, info};
use std::collections::HashSet;

/// Input to [`prune_history_for_context_share`].
#[derive(Debug, Clone, Copy)]
pub struct PruneRequest<'a> {
    pub messages: &'a [Message],
    /// Context window of the target model, in tokens.
    pub max_context_tokens: usize,
    /// Share of the window the kept history may occupy, in `(0, 1]`.
    pub max_history_share: f64,
    /// Number of token-share groups to divide the history into.
    pub parts: usize,
}

/// Outcome of a pruning pass.
#[derive(Debug, Clone)]
pub struct PruneResult {
    /// Kept messages, order preserved.
    pub messages: Vec<Message>,
    /// Dropped originals available for secondary use (summarization).
    /// Excludes orphaned tool results; their originating calls are already
    /// in this list.
    pub dropped_messages_list: Vec<Message>,
    /// Total dropped count, orphans included.
    pub dropped_messages: usize,
    /// Whole groups dropped by the budget pass.
    pub dropped_chunks: usize,
    /// Estimated tokens of the kept messages.
    pub kept_tokens: usize,
}

/// Drop the oldest token-share groups until the remaining history fits
/// `floor(max_context_tokens * max_history_share)` tokens, then remove any
/// tool result whose originating tool-use call did not survive.
///
/// The newest group is always retained, even if it alone still exceeds the
/// budget; emptying the history entirely is never acceptable.
#[must_use]
pub fn prune_history_for_context_share(request: &PruneRequest<'_>) -> PruneResult {
    let budget = (request.max_context_tokens as f64 * request.max_history_share) as usize;
    let total = TokenEstimator::estimate_history(request.messages);

    if total <= budget {
        debug!("history within budget, nothing to prune (tokens={total} budget={budget})");
        return PruneResult {
            messages: request.messages.to_vec(),
            dropped_messages_list: Vec::new(),
            dropped_messages: 0,
            dropped_chunks: 0,
            kept_tokens: total,
        };
    }

    let groups = split_messages_by_token_share(request.messages, request.parts);
    let group_tokens: Vec<usize> = groups
        .iter()
        .map(|g| TokenEstimator::estimate_history(g))
        .collect();

    let mut remaining = total;
    let mut first_kept = 0;
    while first_kept + 1 < groups.len() && remaining > budget {
        remaining -= group_tokens[first_kept];
        first_kept += 1;
    }

    let dropped_chunks = first_kept;
    let dropped_messages_list: Vec<Message> = groups[..first_kept].concat();
    let mut kept: Vec<Message> = groups[first_kept..].concat();

    // Integrity pass over the survivors.
    let kept_ids: HashSet<String> = kept
        .iter()
        .flat_map(|m| m.tool_use_ids().map(str::to_string))
        .collect();
    let before = kept.len();
    kept.retain(|message| match message {
        Message::ToolResult { tool_call_id, .. } => kept_ids.contains(tool_call_id),
        _ => true,
    });
    let orphans = before - kept.len();

    let kept_tokens = TokenEstimator::estimate_history(&kept);
    info!(
        "pruned history: dropped_chunks={dropped_chunks} dropped_messages={} orphans={orphans} kept_tokens={kept_tokens} budget={budget}",
        dropped_messages_list.len() + orphans,
    );

    PruneResult {
        messages: kept,
        dropped_messages: dropped_messages_list.len() + orphans,
        dropped_messages_list,
        dropped_chunks,
        kept_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Role;
    use serde_json::json;

    fn make_message(id: u64, chars: usize) -> Message {
        Message::user("x".repeat(chars), id)
    }

    fn prune(messages: &[Message], max_context_tokens: usize) -> PruneResult {
        prune_history_for_context_share(&PruneRequest {
            messages,
            max_context_tokens,
            max_history_share: 0.5,
            parts: 2,
        })
    }

    #[test]
    fn test_drops_older_chunks_until_budget_met() {
        let messages: Vec<Message> = (1..=4).map(|i| make_message(i, 4000)).collect();
        // Budget is 1000 tokens (50% of 2000).
        let pruned = prune(&messages, 2000);

        assert!(pruned.dropped_chunks > 0);
        assert!(!pruned.messages.is_empty());
        // Either within budget or reduced to the single newest chunk.
        assert!(pruned.kept_tokens <= 1000 || pruned.dropped_chunks == 1);
    }

    #[test]
    fn test_keeps_newest_messages_when_pruning() {
        let messages: Vec<Message> = (1..=6).map(|i| make_message(i, 4000)).collect();
        let total = TokenEstimator::estimate_history(&messages);
        let pruned = prune(&messages, total / 2); // budget = 25% of history

        let kept_ids: Vec<u64> = pruned.messages.iter().map(Message::timestamp).collect();
        let mut expected: Vec<u64> = (1..=6).rev().take(kept_ids.len()).collect();
        expected.reverse();
        assert_eq!(kept_ids, expected);
    }

    #[test]
    fn test_keeps_history_when_within_budget() {
        let messages = vec![make_message(1, 1000)];
        let pruned = prune(&messages, 2000);

        assert_eq!(pruned.dropped_chunks, 0);
        assert_eq!(pruned.dropped_messages, 0);
        assert_eq!(pruned.messages.len(), 1);
        assert!(pruned.dropped_messages_list.is_empty());
        assert_eq!(
            pruned.kept_tokens,
            TokenEstimator::estimate_history(&messages)
        );
    }

    #[test]
    fn test_dropped_list_accounts_for_all_messages() {
        // Simple user messages, no tool calls: counts match exactly.
        let messages: Vec<Message> = (1..=4).map(|i| make_message(i, 4000)).collect();
        let pruned = prune(&messages, 2000);

        assert!(pruned.dropped_chunks > 0);
        assert_eq!(pruned.dropped_messages_list.len(), pruned.dropped_messages);

        let mut all_ids: Vec<u64> = pruned
            .dropped_messages_list
            .iter()
            .chain(pruned.messages.iter())
            .map(Message::timestamp)
            .collect();
        all_ids.sort_unstable();
        assert_eq!(all_ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_removes_orphaned_tool_result_when_call_is_dropped() {
        // The assistant tool-use sits in the oldest (dropped) group, its
        // result in the kept group. Keeping the result would break the
        // upstream model API with a dangling tool-call reference.
        let messages = vec![
            Message::assistant_with_tool_use(
                Some("x".repeat(4000)),
                "call_123",
                "test_tool",
                json!({}),
                1,
            ),
            Message::tool_result("call_123", "test_tool", "result".repeat(500), false, 2),
            make_message(3, 500),
        ];

        let pruned = prune(&messages, 2000);

        assert!(pruned
            .messages
            .iter()
            .all(|m| m.role() != Role::ToolResult));
        // Orphans count toward the total but stay off the summarizable list.
        assert!(pruned.dropped_messages > pruned.dropped_messages_list.len());
    }

    #[test]
    fn test_keeps_tool_result_when_call_is_kept() {
        let messages = vec![
            make_message(1, 4000),
            Message::assistant_with_tool_use(
                Some("y".repeat(500)),
                "call_456",
                "kept_tool",
                json!({}),
                2,
            ),
            Message::tool_result("call_456", "kept_tool", "result", false, 3),
        ];

        let pruned = prune(&messages, 2000);

        let kept_roles: Vec<Role> = pruned.messages.iter().map(Message::role).collect();
        assert!(kept_roles.contains(&Role::Assistant));
        assert!(kept_roles.contains(&Role::ToolResult));
    }

    #[test]
    fn test_removes_multiple_orphans_from_same_dropped_call() {
        let messages = vec![
            Message::Assistant {
                content: crate::messages::Content::Blocks(vec![
                    crate::messages::ContentBlock::Text {
                        text: "x".repeat(4000),
                    },
                    crate::messages::ContentBlock::ToolUse {
                        id: "call_a".to_string(),
                        name: "tool_a".to_string(),
                        input: json!({}),
                    },
                    crate::messages::ContentBlock::ToolUse {
                        id: "call_b".to_string(),
                        name: "tool_b".to_string(),
                        input: json!({}),
                    },
                ]),
                timestamp: 1,
            },
            Message::tool_result("call_a", "tool_a", "result_a", false, 2),
            Message::tool_result("call_b", "tool_b", "result_b", false, 3),
            make_message(4, 500),
        ];

        let pruned = prune(&messages, 2000);

        assert!(pruned
            .messages
            .iter()
            .all(|m| m.role() != Role::ToolResult));
        // One assistant message on the list, two orphans in the count.
        assert_eq!(
            pruned.dropped_messages,
            pruned.dropped_messages_list.len() + 2
        );
    }

    #[test]
    fn test_idempotent_on_within_budget_output() {
        let messages: Vec<Message> = (1..=6).map(|i| make_message(i, 4000)).collect();
        let first = prune(&messages, 8000); // budget 4000, total ~6000

        assert!(first.kept_tokens <= 4000);
        let second = prune(&first.messages, 8000);
        assert_eq!(second.dropped_chunks, 0);
        assert_eq!(
            second.messages.iter().map(Message::timestamp).collect::<Vec<_>>(),
            first.messages.iter().map(Message::timestamp).collect::<Vec<_>>()
        );
    }
}
