//! Deterministic summary appendices.
//!
//! Pure, non-LLM extraction of tool-failure records and file read/write
//! sets. These sections are appended to every summary so critical facts
//! survive even when prose summarization is imperfect.

use crate::messages::{FileOperations, Message, ToolResultDetails};
use std::collections::HashSet;

/// Maximum tool failures listed before the `...and N more` suffix.
const MAX_TOOL_FAILURES: usize = 8;

/// Maximum characters per failure summary.
const MAX_FAILURE_CHARS: usize = 240;

/// A failed tool invocation, derived from an error-flagged tool result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolFailure {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Whitespace-normalized, truncated to 240 chars.
    pub summary: String,
    /// Rendered status/exit-code details, when present.
    pub meta: Option<String>,
}

/// Collect failed tool results, deduplicated by tool-call id, in order.
#[must_use]
pub fn collect_tool_failures(messages: &[Message]) -> Vec<ToolFailure> {
    let mut failures = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for message in messages {
        let Message::ToolResult {
            tool_call_id,
            tool_name,
            content,
            is_error,
            details,
            ..
        } = message
        else {
            continue;
        };
        if *is_error != Some(true) {
            continue;
        }
        if tool_call_id.is_empty() || !seen.insert(tool_call_id) {
            continue;
        }

        let meta = details.as_ref().and_then(format_failure_meta);
        let normalized = normalize_failure_text(&content.joined_text());
        let summary = if normalized.is_empty() {
            if meta.is_some() { "failed" } else { "failed (no output)" }.to_string()
        } else {
            truncate_failure_text(&normalized, MAX_FAILURE_CHARS)
        };

        let tool_name = if tool_name.trim().is_empty() {
            "tool".to_string()
        } else {
            tool_name.clone()
        };

        failures.push(ToolFailure {
            tool_call_id: tool_call_id.clone(),
            tool_name,
            summary,
            meta,
        });
    }

    failures
}

/// Render the `## Tool Failures` section, or an empty string when there is
/// nothing to report.
#[must_use]
pub fn format_tool_failures_section(failures: &[ToolFailure]) -> String {
    if failures.is_empty() {
        return String::new();
    }

    let mut lines: Vec<String> = failures
        .iter()
        .take(MAX_TOOL_FAILURES)
        .map(|failure| {
            let meta = failure
                .meta
                .as_deref()
                .map(|m| format!(" ({m})"))
                .unwrap_or_default();
            format!("- {}{meta}: {}", failure.tool_name, failure.summary)
        })
        .collect();

    if failures.len() > MAX_TOOL_FAILURES {
        lines.push(format!(
            "- ...and {} more",
            failures.len() - MAX_TOOL_FAILURES
        ));
    }

    format!("\n\n## Tool Failures\n{}", lines.join("\n"))
}

/// Paths read but never modified, and paths written or edited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileLists {
    pub read_files: Vec<String>,
    pub modified_files: Vec<String>,
}

/// Derive the read-only and modified path lists, each sorted and
/// deduplicated.
#[must_use]
pub fn compute_file_lists(file_ops: &FileOperations) -> FileLists {
    let modified: std::collections::BTreeSet<&String> =
        file_ops.written.iter().chain(file_ops.edited.iter()).collect();

    let read_files = file_ops
        .read
        .iter()
        .filter(|path| !modified.contains(path))
        .cloned()
        .collect();
    let modified_files = modified.into_iter().cloned().collect();

    FileLists {
        read_files,
        modified_files,
    }
}

/// Render the file-operation blocks, or an empty string when both lists are
/// empty.
#[must_use]
pub fn format_file_operations(read_files: &[String], modified_files: &[String]) -> String {
    let mut sections = Vec::new();

    if !read_files.is_empty() {
        sections.push(format!(
            "<read-files>\n{}\n</read-files>",
            read_files.join("\n")
        ));
    }
    if !modified_files.is_empty() {
        sections.push(format!(
            "<modified-files>\n{}\n</modified-files>",
            modified_files.join("\n")
        ));
    }

    if sections.is_empty() {
        String::new()
    } else {
        format!("\n\n{}", sections.join("\n\n"))
    }
}

fn format_failure_meta(details: &ToolResultDetails) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(status) = details.status.as_deref() {
        parts.push(format!("status={status}"));
    }
    if let Some(exit_code) = details.exit_code {
        parts.push(format!("exitCode={exit_code}"));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

fn normalize_failure_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate with ellipsis, Unicode-safe (never slices mid-codepoint).
fn truncate_failure_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let prefix: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{prefix}...")
}
