//! Token estimation for budgeting decisions.

use crate::messages::{Content, ContentBlock, Message};

/// Estimates token counts for messages.
///
/// Uses a simple heuristic of ~4 characters per token, which provides a
/// reasonable approximation for most English text and code. The estimate is
/// monotonic (longer content never estimates lower) and stable (same input,
/// same output); it never touches the network or a tokenizer.
pub struct TokenEstimator;

impl TokenEstimator {
    /// Characters per token estimate.
    /// This is a conservative estimate; actual ratio varies by content.
    const CHARS_PER_TOKEN: usize = 4;

    /// Overhead tokens per message (role, formatting).
    const MESSAGE_OVERHEAD: usize = 4;

    /// Overhead for tool use blocks (id, name, formatting).
    const TOOL_USE_OVERHEAD: usize = 20;

    /// Overhead for tool result messages (call id, formatting).
    const TOOL_RESULT_OVERHEAD: usize = 10;

    /// A message estimating above this share of the context window must
    /// never share a summarization chunk with neighbors.
    const OVERSIZE_SHARE: f64 = 0.5;

    /// Estimate tokens for a text string.
    #[must_use]
    pub const fn estimate_text(text: &str) -> usize {
        text.len().div_ceil(Self::CHARS_PER_TOKEN)
    }

    /// Estimate tokens for a single message.
    #[must_use]
    pub fn estimate_message(message: &Message) -> usize {
        let content_tokens = match message {
            Message::User { content, .. }
            | Message::Assistant { content, .. }
            | Message::Custom { content, .. } => Self::estimate_content(content),
            Message::ToolResult { content, .. } => {
                Self::estimate_content(content) + Self::TOOL_RESULT_OVERHEAD
            }
            Message::BashExecution {
                command, output, ..
            } => Self::estimate_text(command) + Self::estimate_text(output),
            Message::BranchSummary { summary, .. }
            | Message::CompactionSummary { summary, .. } => Self::estimate_text(summary),
        };

        content_tokens + Self::MESSAGE_OVERHEAD
    }

    /// Estimate tokens for message content.
    #[must_use]
    pub fn estimate_content(content: &Content) -> usize {
        match content {
            Content::Text(text) => Self::estimate_text(text),
            Content::Blocks(blocks) => blocks.iter().map(Self::estimate_block).sum(),
        }
    }

    /// Estimate tokens for a content block.
    #[must_use]
    pub fn estimate_block(block: &ContentBlock) -> usize {
        match block {
            ContentBlock::Text { text } => Self::estimate_text(text),
            ContentBlock::Thinking { thinking } => Self::estimate_text(thinking),
            ContentBlock::ToolUse { name, input, .. } => {
                let input_str = serde_json::to_string(input).unwrap_or_default();
                Self::estimate_text(name)
                    + Self::estimate_text(&input_str)
                    + Self::TOOL_USE_OVERHEAD
            }
        }
    }

    /// Estimate total tokens for a message history.
    #[must_use]
    pub fn estimate_history(messages: &[Message]) -> usize {
        messages.iter().map(Self::estimate_message).sum()
    }

    /// Returns true when a single message is too large to share a
    /// summarization chunk: above half the context window on its own.
    #[must_use]
    pub fn is_oversized_for_summary(message: &Message, context_window_tokens: usize) -> bool {
        let limit = (context_window_tokens as f64 * Self::OVERSIZE_SHARE) as usize;
        Self::estimate_message(message) > limit
    }
}
