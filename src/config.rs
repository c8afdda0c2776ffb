//! Configuration for context compaction.

use serde::{Deserialize, Serialize};

/// Settings governing one compaction operation.
///
/// # Example
///
/// ```
/// use context_compaction::CompactionSettings;
///
/// let settings = CompactionSettings::default()
///     .with_reserve_tokens(8_192)
///     .with_prune_parts(3);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompactionSettings {
    /// Token budget reserved for the summary output itself.
    /// Default: 4,096
    pub reserve_tokens: usize,

    /// Share of the context window that kept history may occupy after
    /// pruning, in `(0, 1]`.
    /// Default: 0.5
    pub max_history_share: f64,

    /// Number of token-share groups the pruner divides history into.
    /// Default: 2 (old half, new half)
    pub prune_parts: usize,

    /// Estimated-token threshold at which compaction should be triggered.
    /// Default: 80,000 (conservative for 128K context models)
    pub compact_threshold_tokens: usize,
}

impl Default for CompactionSettings {
    fn default() -> Self {
        Self {
            reserve_tokens: 4_096,
            max_history_share: 0.5,
            prune_parts: 2,
            compact_threshold_tokens: 80_000,
        }
    }
}

impl CompactionSettings {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the output-token reserve for the summary.
    #[must_use]
    pub const fn with_reserve_tokens(mut self, tokens: usize) -> Self {
        self.reserve_tokens = tokens;
        self
    }

    /// Set the kept-history share of the context window.
    #[must_use]
    pub const fn with_max_history_share(mut self, share: f64) -> Self {
        self.max_history_share = share;
        self
    }

    /// Set the number of pruning groups.
    #[must_use]
    pub const fn with_prune_parts(mut self, parts: usize) -> Self {
        self.prune_parts = parts;
        self
    }

    /// Set the compaction-trigger threshold.
    #[must_use]
    pub const fn with_compact_threshold(mut self, tokens: usize) -> Self {
        self.compact_threshold_tokens = tokens;
        self
    }

    /// Check whether a history of the given estimated size should be
    /// compacted.
    #[must_use]
    pub const fn should_compact(&self, estimated_tokens: usize) -> bool {
        estimated_tokens >= self.compact_threshold_tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = CompactionSettings::default();
        assert_eq!(settings.reserve_tokens, 4_096);
        assert!((settings.max_history_share - 0.5).abs() < f64::EPSILON);
        assert_eq!(settings.prune_parts, 2);
    }

    #[test]
    fn test_builder_pattern() {
        let settings = CompactionSettings::new()
            .with_reserve_tokens(2_000)
            .with_max_history_share(0.4)
            .with_prune_parts(4)
            .with_compact_threshold(50_000);

        assert_eq!(settings.reserve_tokens, 2_000);
        assert!((settings.max_history_share - 0.4).abs() < f64::EPSILON);
        assert_eq!(settings.prune_parts, 4);
        assert_eq!(settings.compact_threshold_tokens, 50_000);
    }

    #[test]
    fn test_should_compact() {
        let settings = CompactionSettings::default().with_compact_threshold(10_000);
        assert!(!settings.should_compact(9_999));
        assert!(settings.should_compact(10_000));
    }
}
