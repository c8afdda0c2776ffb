//! Error taxonomy for compaction operations.

use thiserror::Error;

/// Failure of a compaction attempt.
///
/// Provider failures and context overflows surface identically: within one
/// attempt both are terminal for the current tier and trigger tier fallback.
/// Aborts are distinct — an aborted operation must fail fast instead of
/// degrading through the remaining tiers.
#[derive(Debug, Error)]
pub enum CompactionError {
    /// The summarization capability failed (provider error, network failure,
    /// or a request that exceeded the model's input limit).
    #[error("summarization failed: {0}")]
    Provider(String),

    /// The caller cancelled the operation.
    #[error("compaction aborted")]
    Aborted,
}

impl CompactionError {
    /// Returns true if this failure came from cancellation.
    #[must_use]
    pub const fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }
}
