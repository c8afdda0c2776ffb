//! Model-snapshot lookup over the session's custom log entries.
//!
//! Sessions append a lightweight `model-snapshot` entry whenever the active
//! model changes. When compaction triggers outside an active turn there is no
//! current model to ask, so the handoff resolves the most recently recorded
//! one by scanning this append-only log newest-first. The log is never
//! mutated here.

use crate::messages::Message;
use serde::{Deserialize, Serialize};

/// Custom-entry type tag carrying a model snapshot.
pub const MODEL_SNAPSHOT_CUSTOM_TYPE: &str = "model-snapshot";

/// Payload of a `model-snapshot` log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSnapshot {
    pub timestamp: u64,
    pub provider: String,
    #[serde(rename = "modelId")]
    pub model_id: String,
}

/// Newest `model-snapshot` entry in the session log, if any.
///
/// Entries with an unreadable payload are skipped rather than treated as
/// terminal; an older valid snapshot is still better than none.
#[must_use]
pub fn read_last_model_snapshot(entries: &[Message]) -> Option<ModelSnapshot> {
    entries.iter().rev().find_map(|entry| match entry {
        Message::Custom {
            custom_type,
            content,
            ..
        } if custom_type == MODEL_SNAPSHOT_CUSTOM_TYPE => content
            .first_text()
            .and_then(|text| serde_json::from_str(text).ok()),
        _ => None,
    })
}
