//! Consumed LLM capabilities.
//!
//! The engine never talks to a provider directly; it is handed an opaque
//! summarization capability and a model registry by the calling runtime.
//! Retry and auth handling live behind these seams, not in the engine.

pub mod snapshot;
pub mod types;

pub use snapshot::{read_last_model_snapshot, ModelSnapshot, MODEL_SNAPSHOT_CUSTOM_TYPE};
pub use types::*;

use anyhow::Result;
use async_trait::async_trait;

/// Opaque LLM completion capability for summarization.
///
/// A transport-level failure surfaces as `Err`; a completed call that the
/// provider itself flagged as failed surfaces as a response with
/// [`StopReason::Error`]. The engine treats both as hard failures for the
/// current compaction tier.
#[async_trait]
pub trait SummaryProvider: Send + Sync {
    async fn summarize(&self, request: SummarizeRequest) -> Result<SummarizeResponse>;
}
