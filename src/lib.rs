//! Context-compaction engine for LLM-powered agent runtimes.
//!
//! Keeps a long-running conversation's message history within a bounded
//! token budget while preserving enough information for the agent to
//! continue coherently. The engine decides what to keep verbatim, what to
//! collapse into a summary, and guarantees the operation never fails
//! catastrophically:
//!
//! - Budgeted eviction of the oldest history, without ever orphaning a tool
//!   result from its originating call
//! - Staged chunk-by-chunk summarization with continuity across repeated
//!   compaction cycles
//! - Deterministic appendices (tool failures, file operations) that survive
//!   even an imperfect prose summary
//! - A three-tier fallback handoff that returns either a usable summary or
//!   an explicit "apply your default strategy" signal — never an error
//!
//! The LLM itself is a collaborator: callers inject an opaque
//! [`SummaryProvider`] and a [`ModelRegistry`]; the engine owns no network
//! client, CLI, or persistence format.
//!
//! # Example
//!
//! ```ignore
//! use context_compaction::{
//!     CompactionHandoff, CompactionPreparation, CompactionSettings, SessionContext,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! let handoff = CompactionHandoff::new(provider, registry);
//! let signal = CancellationToken::new();
//!
//! match handoff.run(&preparation, &session, &signal).await {
//!     Some(outcome) => apply_summary(outcome),
//!     None => apply_default_compaction(),
//! }
//! ```

#![forbid(unsafe_code)]

mod appendix;
mod chunker;
mod config;
mod error;
mod estimator;
mod handoff;
pub mod llm;
mod messages;
mod pruner;
mod summarizer;

pub use appendix::{
    collect_tool_failures, compute_file_lists, format_file_operations,
    format_tool_failures_section, FileLists, ToolFailure,
};
pub use chunker::{chunk_messages_by_max_tokens, split_messages_by_token_share, Chunk};
pub use config::CompactionSettings;
pub use error::CompactionError;
pub use estimator::TokenEstimator;
pub use handoff::{
    build_split_turn_messages, CompactionDetails, CompactionHandoff, CompactionOutcome,
    CompactionPreparation, SessionContext, SPLIT_TURN_CUSTOM_TYPE, SPLIT_TURN_MARKER,
};
pub use llm::{ModelRef, ModelRegistry, SummaryProvider};
pub use messages::{Content, ContentBlock, FileOperations, Message, Role, ToolResultDetails};
pub use pruner::{prune_history_for_context_share, PruneRequest, PruneResult};
pub use summarizer::{
    compute_adaptive_chunk_ratio, role_counts, serialize_conversation,
    structural_session_summary, summarize_in_stages, summarize_with_fallback,
    StagedSummaryRequest, DEFAULT_INSTRUCTIONS, SUMMARY_SYSTEM_PROMPT,
};
