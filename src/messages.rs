//! Message data model shared by every compaction component.
//!
//! A [`Message`] is one entry of a session's conversation history. The engine
//! only ever reads messages and returns derived subsets; it never mutates one
//! in place. Timestamps are monotonically increasing ordering keys supplied
//! by the calling session, not wall-clock values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One entry of conversation history, tagged by role.
///
/// Role-specific fields live on the variant that owns them: tool results
/// carry their originating call id, bash executions carry command and output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "user")]
    User { content: Content, timestamp: u64 },

    #[serde(rename = "assistant")]
    Assistant { content: Content, timestamp: u64 },

    #[serde(rename = "toolResult")]
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        content: Content,
        #[serde(rename = "isError", skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<ToolResultDetails>,
        timestamp: u64,
    },

    #[serde(rename = "bashExecution")]
    BashExecution {
        command: String,
        output: String,
        #[serde(rename = "exitCode", skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
        #[serde(default)]
        cancelled: bool,
        timestamp: u64,
    },

    #[serde(rename = "custom")]
    Custom {
        #[serde(rename = "customType")]
        custom_type: String,
        content: Content,
        timestamp: u64,
    },

    #[serde(rename = "branchSummary")]
    BranchSummary { summary: String, timestamp: u64 },

    #[serde(rename = "compactionSummary")]
    CompactionSummary { summary: String, timestamp: u64 },
}

impl Message {
    #[must_use]
    pub fn user(text: impl Into<String>, timestamp: u64) -> Self {
        Self::User {
            content: Content::Text(text.into()),
            timestamp,
        }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>, timestamp: u64) -> Self {
        Self::Assistant {
            content: Content::Text(text.into()),
            timestamp,
        }
    }

    #[must_use]
    pub fn assistant_with_tool_use(
        text: Option<String>,
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Value,
        timestamp: u64,
    ) -> Self {
        let mut blocks = Vec::new();
        if let Some(t) = text {
            blocks.push(ContentBlock::Text { text: t });
        }
        blocks.push(ContentBlock::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        });
        Self::Assistant {
            content: Content::Blocks(blocks),
            timestamp,
        }
    }

    #[must_use]
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
        timestamp: u64,
    ) -> Self {
        Self::ToolResult {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: Content::Text(content.into()),
            is_error: if is_error { Some(true) } else { None },
            details: None,
            timestamp,
        }
    }

    /// The role tag of this message.
    #[must_use]
    pub const fn role(&self) -> Role {
        match self {
            Self::User { .. } => Role::User,
            Self::Assistant { .. } => Role::Assistant,
            Self::ToolResult { .. } => Role::ToolResult,
            Self::BashExecution { .. } => Role::BashExecution,
            Self::Custom { .. } => Role::Custom,
            Self::BranchSummary { .. } => Role::BranchSummary,
            Self::CompactionSummary { .. } => Role::CompactionSummary,
        }
    }

    /// Ordering key assigned by the calling session.
    #[must_use]
    pub const fn timestamp(&self) -> u64 {
        match self {
            Self::User { timestamp, .. }
            | Self::Assistant { timestamp, .. }
            | Self::ToolResult { timestamp, .. }
            | Self::BashExecution { timestamp, .. }
            | Self::Custom { timestamp, .. }
            | Self::BranchSummary { timestamp, .. }
            | Self::CompactionSummary { timestamp, .. } => *timestamp,
        }
    }

    /// Ids of tool-use blocks carried by this message (assistant only).
    pub fn tool_use_ids(&self) -> impl Iterator<Item = &str> {
        let blocks = match self {
            Self::Assistant {
                content: Content::Blocks(blocks),
                ..
            } => blocks.as_slice(),
            _ => &[],
        };
        blocks.iter().filter_map(|b| match b {
            ContentBlock::ToolUse { id, .. } => Some(id.as_str()),
            _ => None,
        })
    }

    /// Returns true for a tool result flagged as an error.
    #[must_use]
    pub fn is_failed_tool_result(&self) -> bool {
        matches!(
            self,
            Self::ToolResult {
                is_error: Some(true),
                ..
            }
        )
    }
}

/// Role tag, used for breakdowns and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    User,
    Assistant,
    ToolResult,
    BashExecution,
    Custom,
    BranchSummary,
    CompactionSummary,
}

impl Role {
    /// Stable lowercase label, matching the serialized role tag.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::ToolResult => "toolResult",
            Self::BashExecution => "bashExecution",
            Self::Custom => "custom",
            Self::BranchSummary => "branchSummary",
            Self::CompactionSummary => "compactionSummary",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Message content: plain text or a list of typed blocks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Content {
    /// First text block, if any.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Blocks(blocks) => blocks.iter().find_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }

    /// Concatenated text of all text blocks, skipping thinking and tool-use.
    #[must_use]
    pub fn joined_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "thinking")]
    Thinking { thinking: String },

    #[serde(rename = "toolUse")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
}

/// Structured details attached to a tool result.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolResultDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(rename = "exitCode", skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

/// File paths touched during the session, accumulated by the caller.
///
/// Ordered sets so derived lists come out sorted and deduplicated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FileOperations {
    pub read: BTreeSet<String>,
    pub written: BTreeSet<String>,
    pub edited: BTreeSet<String>,
}
