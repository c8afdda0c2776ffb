//! The compaction handoff: entry point invoked by the agent runtime's
//! "before compact" lifecycle hook.
//!
//! Three tiers, entered once per trigger, terminal on first success:
//!
//! 1. **Freeform** — one summarization call over the flattened transcript.
//! 2. **Safeguard** — defensively pre-prune oversized input, then staged
//!    summarization with an adaptively chosen chunk size.
//! 3. **Default** — no result; the runtime applies its own built-in
//!    strategy.
//!
//! The tier machine never raises: every code path returns either an outcome
//! or `None`. Aborts short-circuit straight to `None` — a cancelled
//! compaction must not silently degrade and keep running.

use crate::appendix::{
    collect_tool_failures, compute_file_lists, format_file_operations,
    format_tool_failures_section,
};
use crate::config::CompactionSettings;
use crate::error::CompactionError;
use crate::estimator::TokenEstimator;
use crate::llm::{read_last_model_snapshot, ModelRef, ModelRegistry, SummaryProvider};
use crate::messages::{Content, ContentBlock, FileOperations, Message};
use crate::pruner::{prune_history_for_context_share, PruneRequest};
use crate::summarizer::{
    build_stage_prompt, compute_adaptive_chunk_ratio, request_summary, role_counts,
    serialize_conversation, stage_output_budget, summarize_in_stages, StagedSummaryRequest,
};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Marker inserted between the summarizable history and the messages of a
/// turn that was split mid-stream by the compaction trigger.
pub const SPLIT_TURN_MARKER: &str =
    "[Split turn prefix follows; summarize with the rest of the conversation.]";

/// Custom-entry type tag of the split-turn marker message.
pub const SPLIT_TURN_CUSTOM_TYPE: &str = "split-turn";

/// Share of the context window that triggers the safeguard pre-prune.
const SAFEGUARD_INPUT_SHARE: f64 = 0.5;

/// Input snapshot handed to the engine by the triggering session.
#[derive(Debug, Clone)]
pub struct CompactionPreparation {
    /// Boundary marker past which messages are already excluded.
    pub first_kept_entry_id: String,
    /// Candidate-for-removal history.
    pub messages_to_summarize: Vec<Message>,
    /// Messages of a turn split mid-stream by the trigger, kept separate so
    /// they can be merged back with a marker.
    pub turn_prefix_messages: Vec<Message>,
    pub is_split_turn: bool,
    /// Estimated token size of the full pre-compaction history.
    pub tokens_before: usize,
    /// Text of the last compaction, for continuity.
    pub previous_summary: Option<String>,
    pub file_ops: FileOperations,
    pub settings: CompactionSettings,
}

/// Terminal result of a successful compaction.
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub summary: String,
    pub first_kept_entry_id: String,
    pub tokens_before: usize,
    pub details: CompactionDetails,
}

#[derive(Debug, Clone, Default)]
pub struct CompactionDetails {
    pub read_files: Vec<String>,
    pub modified_files: Vec<String>,
}

/// Session state the handoff needs from the calling runtime.
pub struct SessionContext<'a> {
    /// Currently active model, when the trigger fired inside a turn.
    pub active_model: Option<ModelRef>,
    /// Append-only session log, queried newest-first for a model snapshot
    /// when no model is active.
    pub log_entries: &'a [Message],
    /// Caller-supplied steering guidance for the summarizer.
    pub custom_instructions: Option<&'a str>,
}

/// Non-terminal tiers of the handoff machine. Exhausting them is the
/// Default state: return no result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Freeform,
    Safeguard,
}

/// The compaction handoff.
pub struct CompactionHandoff<P: SummaryProvider> {
    provider: Arc<P>,
    registry: Arc<dyn ModelRegistry>,
}

impl<P: SummaryProvider> CompactionHandoff<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, registry: Arc<dyn ModelRegistry>) -> Self {
        Self { provider, registry }
    }

    /// Run one compaction. Returns `None` when the runtime should apply its
    /// own default strategy; never panics or propagates an error.
    pub async fn run(
        &self,
        preparation: &CompactionPreparation,
        session: &SessionContext<'_>,
        signal: &CancellationToken,
    ) -> Option<CompactionOutcome> {
        let Some(model) = self.resolve_model(session) else {
            warn!("compaction handoff: missing model");
            return None;
        };
        let Some(api_key) = self.registry.api_key_for(&model) else {
            warn!("compaction handoff: missing api key for {model}");
            return None;
        };
        let context_window = self.registry.context_window_tokens(&model);

        self.log_input_snapshot(preparation, &model);

        let file_lists = compute_file_lists(&preparation.file_ops);
        let details = CompactionDetails {
            read_files: file_lists.read_files,
            modified_files: file_lists.modified_files,
        };

        let mut tier = Tier::Freeform;
        loop {
            let attempt = match tier {
                Tier::Freeform => {
                    self.freeform(preparation, session, &api_key, signal).await
                }
                Tier::Safeguard => {
                    self.safeguard(preparation, session, &api_key, context_window, signal)
                        .await
                }
            };

            match attempt {
                Ok(summary) => {
                    if tier == Tier::Safeguard {
                        info!("compaction handoff: used safeguard fallback");
                    }
                    return Some(CompactionOutcome {
                        summary,
                        first_kept_entry_id: preparation.first_kept_entry_id.clone(),
                        tokens_before: preparation.tokens_before,
                        details,
                    });
                }
                Err(err) if err.is_abort() => {
                    info!("compaction handoff: aborted");
                    return None;
                }
                Err(err) => match tier {
                    Tier::Freeform => {
                        warn!("freeform compaction failed; trying safeguard: {err}");
                        tier = Tier::Safeguard;
                    }
                    Tier::Safeguard => {
                        warn!("safeguard compaction failed; falling back to default compaction: {err}");
                        return None;
                    }
                },
            }
        }
    }

    /// Tier 1: a single summarization call over the full flattened
    /// transcript.
    async fn freeform(
        &self,
        preparation: &CompactionPreparation,
        session: &SessionContext<'_>,
        api_key: &str,
        signal: &CancellationToken,
    ) -> Result<String, CompactionError> {
        let merged = build_split_turn_messages(
            &preparation.messages_to_summarize,
            &preparation.turn_prefix_messages,
            preparation.is_split_turn,
        );

        let transcript = serialize_conversation(&merged);
        let prompt = build_stage_prompt(session.custom_instructions, None, &transcript);
        let summary = request_summary(
            self.provider.as_ref(),
            prompt,
            stage_output_budget(preparation.settings.reserve_tokens),
            api_key,
            signal,
        )
        .await?;

        Ok(self.append_sections(summary, preparation))
    }

    /// Tier 2: recompute defensively. Pre-prune when the input alone could
    /// overflow a summarization call, then summarize in adaptive stages.
    async fn safeguard(
        &self,
        preparation: &CompactionPreparation,
        session: &SessionContext<'_>,
        api_key: &str,
        context_window: usize,
        signal: &CancellationToken,
    ) -> Result<String, CompactionError> {
        let prefix_tokens =
            TokenEstimator::estimate_history(&preparation.turn_prefix_messages);
        let body_tokens =
            TokenEstimator::estimate_history(&preparation.messages_to_summarize);
        let input_limit = (context_window as f64 * SAFEGUARD_INPUT_SHARE) as usize;

        let mut messages_to_summarize = preparation.messages_to_summarize.clone();
        if prefix_tokens + body_tokens > input_limit {
            let pruned = prune_history_for_context_share(&PruneRequest {
                messages: &messages_to_summarize,
                max_context_tokens: context_window,
                max_history_share: SAFEGUARD_INPUT_SHARE,
                parts: preparation.settings.prune_parts,
            });
            if pruned.dropped_chunks > 0 {
                warn!(
                    "compaction safeguard: input used {}% of context; dropped {} older chunk(s) \
                     ({} messages) to fit the summarization budget",
                    (prefix_tokens + body_tokens) * 100 / context_window.max(1),
                    pruned.dropped_chunks,
                    pruned.dropped_messages,
                );
                messages_to_summarize = pruned.messages;
            }
        }

        let merged = build_split_turn_messages(
            &messages_to_summarize,
            &preparation.turn_prefix_messages,
            preparation.is_split_turn,
        );

        let adaptive_ratio = compute_adaptive_chunk_ratio(&merged, context_window);
        let max_chunk_tokens = ((context_window as f64 * adaptive_ratio) as usize).max(1);
        debug!(
            "compaction safeguard: adaptive_ratio={adaptive_ratio:.2} max_chunk_tokens={max_chunk_tokens}"
        );

        let summary = summarize_in_stages(
            self.provider.as_ref(),
            &StagedSummaryRequest {
                messages: &merged,
                api_key,
                signal,
                reserve_tokens: preparation.settings.reserve_tokens.max(1),
                max_chunk_tokens,
                context_window,
                custom_instructions: session.custom_instructions,
                previous_summary: preparation.previous_summary.as_deref(),
            },
        )
        .await?;

        Ok(self.append_sections(summary, preparation))
    }

    /// Append the deterministic sections so critical facts survive even if
    /// the prose summary is imperfect.
    fn append_sections(&self, mut summary: String, preparation: &CompactionPreparation) -> String {
        let all_messages: Vec<Message> = preparation
            .messages_to_summarize
            .iter()
            .chain(preparation.turn_prefix_messages.iter())
            .cloned()
            .collect();
        let failures = collect_tool_failures(&all_messages);
        summary.push_str(&format_tool_failures_section(&failures));

        let file_lists = compute_file_lists(&preparation.file_ops);
        summary.push_str(&format_file_operations(
            &file_lists.read_files,
            &file_lists.modified_files,
        ));
        summary
    }

    fn resolve_model(&self, session: &SessionContext<'_>) -> Option<ModelRef> {
        if let Some(model) = session.active_model.clone() {
            return Some(model);
        }
        let snapshot = read_last_model_snapshot(session.log_entries)?;
        self.registry.find(&snapshot.provider, &snapshot.model_id)
    }

    fn log_input_snapshot(&self, preparation: &CompactionPreparation, model: &ModelRef) {
        let merged = build_split_turn_messages(
            &preparation.messages_to_summarize,
            &preparation.turn_prefix_messages,
            preparation.is_split_turn,
        );
        let first_roles = merged
            .iter()
            .take(6)
            .map(|m| m.role().label())
            .collect::<Vec<_>>()
            .join(",");
        debug!(
            "compaction handoff: input snapshot messages_to_summarize={} turn_prefix_messages={} \
             merged={} is_split_turn={} role_counts={:?} first_roles={first_roles} model={model}",
            preparation.messages_to_summarize.len(),
            preparation.turn_prefix_messages.len(),
            merged.len(),
            preparation.is_split_turn,
            role_counts(&merged),
        );
    }
}

/// Merge the summarizable history with a split turn's prefix messages,
/// inserting the marker so the summarizer treats the prefix as part of the
/// same conversation.
#[must_use]
pub fn build_split_turn_messages(
    messages_to_summarize: &[Message],
    turn_prefix_messages: &[Message],
    is_split_turn: bool,
) -> Vec<Message> {
    if turn_prefix_messages.is_empty() {
        return messages_to_summarize.to_vec();
    }

    let mut merged = messages_to_summarize.to_vec();
    if is_split_turn {
        // Reuse the prefix's ordering key; the engine never mints one.
        let timestamp = turn_prefix_messages[0].timestamp();
        merged.push(Message::Custom {
            custom_type: SPLIT_TURN_CUSTOM_TYPE.to_string(),
            content: Content::Blocks(vec![ContentBlock::Text {
                text: SPLIT_TURN_MARKER.to_string(),
            }]),
            timestamp,
        });
    }
    merged.extend_from_slice(turn_prefix_messages);
    merged
}
