//! Partitioning of message sequences for token-budget decisions.
//!
//! Two partitioning schemes, both order-preserving and covering every input
//! message exactly once:
//!
//! - [`chunk_messages_by_max_tokens`]: greedy packing into runs bounded by a
//!   token limit, for staged summarization.
//! - [`split_messages_by_token_share`]: division into N roughly equal-token
//!   groups, for old-versus-new budgeting decisions.

use crate::estimator::TokenEstimator;
use crate::messages::Message;

/// A contiguous run of messages with its estimated token size.
///
/// Ephemeral: chunks exist only within a single pruning or summarization
/// call and are never persisted.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub messages: Vec<Message>,
    pub estimated_tokens: usize,
}

impl Chunk {
    /// A chunk holding exactly one message that exceeds the nominal limit.
    #[must_use]
    pub fn is_oversized(&self, max_tokens: usize) -> bool {
        self.estimated_tokens > max_tokens && self.messages.len() == 1
    }
}

/// Pack messages left-to-right into chunks of at most `max_tokens` estimated
/// tokens each.
///
/// A message whose own estimate exceeds `max_tokens` is placed alone in its
/// own chunk; atomicity of a message takes priority over the limit, so such
/// a chunk may exceed it.
#[must_use]
pub fn chunk_messages_by_max_tokens(messages: &[Message], max_tokens: usize) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let mut current: Vec<Message> = Vec::new();
    let mut current_tokens = 0usize;

    for message in messages {
        let tokens = TokenEstimator::estimate_message(message);

        if tokens > max_tokens {
            if !current.is_empty() {
                chunks.push(Chunk {
                    messages: std::mem::take(&mut current),
                    estimated_tokens: current_tokens,
                });
                current_tokens = 0;
            }
            chunks.push(Chunk {
                messages: vec![message.clone()],
                estimated_tokens: tokens,
            });
            continue;
        }

        if !current.is_empty() && current_tokens + tokens > max_tokens {
            chunks.push(Chunk {
                messages: std::mem::take(&mut current),
                estimated_tokens: current_tokens,
            });
            current_tokens = 0;
        }

        current.push(message.clone());
        current_tokens += tokens;
    }

    if !current.is_empty() {
        chunks.push(Chunk {
            messages: current,
            estimated_tokens: current_tokens,
        });
    }

    chunks
}

/// Split messages into at most `parts` order-preserving groups whose token
/// sizes approach `total / parts` each.
///
/// With fewer messages than requested parts the result has fewer groups;
/// no group is ever empty.
#[must_use]
pub fn split_messages_by_token_share(messages: &[Message], parts: usize) -> Vec<Vec<Message>> {
    if messages.is_empty() {
        return Vec::new();
    }
    let parts = parts.max(1);
    if parts == 1 || messages.len() == 1 {
        return vec![messages.to_vec()];
    }

    let total = TokenEstimator::estimate_history(messages);
    let target = total.div_ceil(parts);

    let mut groups: Vec<Vec<Message>> = Vec::new();
    let mut current: Vec<Message> = Vec::new();
    let mut current_tokens = 0usize;

    for message in messages {
        let tokens = TokenEstimator::estimate_message(message);
        // The final group absorbs whatever remains.
        let can_close = !current.is_empty() && groups.len() + 1 < parts;
        if can_close && current_tokens + tokens > target {
            groups.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        current.push(message.clone());
        current_tokens += tokens;
    }
    groups.push(current);

    groups
}
