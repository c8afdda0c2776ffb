//! Staged summarization of long message histories.
//!
//! A possibly huge history is reduced into one cumulative natural-language
//! summary chunk by chunk: each stage summarizes one chunk together with the
//! running summary from the previous stage, optionally seeded by the summary
//! of an earlier compaction cycle. Stage failures propagate as typed errors;
//! graceful degradation is the fallback orchestrator's job, not this
//! module's. The one exception is [`summarize_with_fallback`], which trades
//! prose for a deterministic structural description when every attempt
//! fails.

use crate::chunker::{chunk_messages_by_max_tokens, Chunk};
use crate::error::CompactionError;
use crate::estimator::TokenEstimator;
use crate::llm::{SummarizeRequest, SummaryProvider};
use crate::messages::{Content, ContentBlock, Message, Role};
use log::{debug, warn};
use tokio_util::sync::CancellationToken;

/// System prompt for every summarization call.
pub const SUMMARY_SYSTEM_PROMPT: &str = "You are a compaction summarizer. Produce a concise \
     summary for future context. Do not continue the conversation or answer questions.";

/// Instructions used when the caller supplies none.
pub const DEFAULT_INSTRUCTIONS: &str = "Summarize the conversation for continuity. Preserve \
     exact file paths, commands, and errors. Keep it concise.";

/// Lower clamp of the adaptive chunk ratio.
const MIN_CHUNK_RATIO: f64 = 0.15;

/// Upper clamp of the adaptive chunk ratio.
const MAX_CHUNK_RATIO: f64 = 0.5;

/// Characters of excerpt included when describing an oversized message.
const OVERSIZE_EXCERPT_CHARS: usize = 2000;

/// Share of the reserve actually requested as output tokens.
const OUTPUT_BUDGET_SHARE: f64 = 0.8;

/// Choose how much of the context window each summarization call may
/// consume.
///
/// The ratio decreases monotonically as the history grows relative to the
/// window: very large histories are summarized in many small chunks, small
/// histories in few large ones. Clamped to `[0.15, 0.5]` so chunks are
/// neither vanishingly small nor able to overflow the model on their own.
#[must_use]
pub fn compute_adaptive_chunk_ratio(messages: &[Message], context_window_tokens: usize) -> f64 {
    if context_window_tokens == 0 {
        return MIN_CHUNK_RATIO;
    }
    let usage = TokenEstimator::estimate_history(messages) as f64 / context_window_tokens as f64;
    (MAX_CHUNK_RATIO / (1.0 + usage)).clamp(MIN_CHUNK_RATIO, MAX_CHUNK_RATIO)
}

/// Parameters for one staged summarization run.
#[derive(Debug, Clone, Copy)]
pub struct StagedSummaryRequest<'a> {
    pub messages: &'a [Message],
    pub api_key: &'a str,
    pub signal: &'a CancellationToken,
    /// Token budget reserved for the summary output.
    pub reserve_tokens: usize,
    /// Token bound for each summarization chunk.
    pub max_chunk_tokens: usize,
    /// Context window of the resolved model.
    pub context_window: usize,
    /// Steering guidance included on every stage call.
    pub custom_instructions: Option<&'a str>,
    /// Summary of the previous compaction cycle, seeding the first stage.
    pub previous_summary: Option<&'a str>,
}

/// Reduce the messages to one cumulative summary, one chunk at a time.
///
/// The cancellation signal is checked before every stage and raced against
/// every provider call; an abort fails immediately with
/// [`CompactionError::Aborted`] and no partial result. Any other per-stage
/// failure propagates as [`CompactionError::Provider`].
pub async fn summarize_in_stages<P: SummaryProvider>(
    provider: &P,
    request: &StagedSummaryRequest<'_>,
) -> Result<String, CompactionError> {
    let chunks = chunk_messages_by_max_tokens(request.messages, request.max_chunk_tokens);
    let total_stages = chunks.len();
    let mut running: Option<String> = request.previous_summary.map(str::to_string);
    let max_output_tokens = stage_output_budget(request.reserve_tokens);

    for (stage, chunk) in chunks.iter().enumerate() {
        if request.signal.is_cancelled() {
            return Err(CompactionError::Aborted);
        }

        let transcript = stage_transcript(chunk, request.context_window);
        let prompt =
            build_stage_prompt(request.custom_instructions, running.as_deref(), &transcript);
        debug!(
            "summarization stage {}/{total_stages} (chunk_tokens={} prompt_chars={})",
            stage + 1,
            chunk.estimated_tokens,
            prompt.len()
        );

        let text = request_summary(
            provider,
            prompt,
            max_output_tokens,
            request.api_key,
            request.signal,
        )
        .await?;
        running = Some(text);
    }

    running.ok_or_else(|| CompactionError::Provider("no messages to summarize".to_string()))
}

/// Staged summarization that degrades to a deterministic structural
/// description instead of failing.
///
/// Aborts still propagate: a cancelled operation must not keep running and
/// return degraded output. Intended as the built-in strategy for callers
/// that cannot tolerate an empty result.
pub async fn summarize_with_fallback<P: SummaryProvider>(
    provider: &P,
    request: &StagedSummaryRequest<'_>,
) -> Result<String, CompactionError> {
    match summarize_in_stages(provider, request).await {
        Ok(summary) => Ok(summary),
        Err(err) if err.is_abort() => Err(err),
        Err(err) => {
            warn!("staged summarization failed, using structural fallback: {err}");
            Ok(structural_session_summary(request.messages))
        }
    }
}

/// Deterministic description of a session used when prose summarization is
/// unavailable: message count, approximate size, and a per-role breakdown.
#[must_use]
pub fn structural_session_summary(messages: &[Message]) -> String {
    let tokens = TokenEstimator::estimate_history(messages);
    let breakdown = role_counts(messages)
        .into_iter()
        .map(|(label, count)| format!("{count} {label}"))
        .collect::<Vec<_>>()
        .join(", ");

    if breakdown.is_empty() {
        format!(
            "Session contained {} messages (~{tokens} tokens).",
            messages.len()
        )
    } else {
        format!(
            "Session contained {} messages (~{tokens} tokens): {breakdown}.",
            messages.len()
        )
    }
}

/// Per-role message counts in a stable role order, zero counts omitted.
#[must_use]
pub fn role_counts(messages: &[Message]) -> Vec<(&'static str, usize)> {
    const ORDER: [Role; 7] = [
        Role::User,
        Role::Assistant,
        Role::ToolResult,
        Role::BashExecution,
        Role::Custom,
        Role::BranchSummary,
        Role::CompactionSummary,
    ];

    ORDER
        .iter()
        .filter_map(|role| {
            let count = messages.iter().filter(|m| m.role() == *role).count();
            (count > 0).then(|| (role.label(), count))
        })
        .collect()
}

/// Flatten messages into a linear transcript with role prefixes.
#[must_use]
pub fn serialize_conversation(messages: &[Message]) -> String {
    let mut parts: Vec<String> = Vec::new();

    for message in messages {
        match message {
            Message::User { content, .. } => {
                let text = render_blocks(content);
                if !text.is_empty() {
                    parts.push(format!("[User]: {text}"));
                }
            }
            Message::Assistant { content, .. } => {
                let text = render_blocks(content);
                if !text.is_empty() {
                    parts.push(format!("[Assistant]: {text}"));
                }
            }
            Message::ToolResult { content, .. } => {
                let text = render_blocks(content);
                if !text.is_empty() {
                    parts.push(format!("[Tool result]: {text}"));
                }
            }
            Message::BashExecution {
                command,
                output,
                exit_code,
                cancelled,
                ..
            } => {
                let suffix = if *cancelled { " (cancelled)" } else { "" };
                let exit = exit_code
                    .map(|code| format!(" (exit {code})"))
                    .unwrap_or_default();
                parts.push(format!("[Bash]: {command}{suffix}{exit}\n{output}").trim().to_string());
            }
            Message::Custom { content, .. } => {
                let text = render_blocks(content);
                if !text.is_empty() {
                    parts.push(format!("[Context]: {text}"));
                }
            }
            Message::BranchSummary { summary, .. }
            | Message::CompactionSummary { summary, .. } => {
                if !summary.is_empty() {
                    parts.push(format!("[Context]: {summary}"));
                }
            }
        }
    }

    parts.join("\n\n")
}

/// One provider call with cancellation racing, shared by the staged
/// summarizer and the freeform handoff tier.
pub(crate) async fn request_summary<P: SummaryProvider>(
    provider: &P,
    prompt: String,
    max_output_tokens: u32,
    api_key: &str,
    signal: &CancellationToken,
) -> Result<String, CompactionError> {
    let request = SummarizeRequest {
        prompt,
        system_prompt: SUMMARY_SYSTEM_PROMPT.to_string(),
        max_output_tokens,
        api_key: api_key.to_string(),
    };

    let response = tokio::select! {
        biased;
        () = signal.cancelled() => return Err(CompactionError::Aborted),
        result = provider.summarize(request) => {
            result.map_err(|e| CompactionError::Provider(e.to_string()))?
        }
    };

    if response.is_error() {
        return Err(CompactionError::Provider(
            response
                .error_message
                .unwrap_or_else(|| "unknown provider error".to_string()),
        ));
    }
    Ok(response.text)
}

/// Output-token bound requested from the provider.
pub(crate) fn stage_output_budget(reserve_tokens: usize) -> u32 {
    let budget = (reserve_tokens as f64 * OUTPUT_BUDGET_SHARE) as usize;
    budget.max(1).min(u32::MAX as usize) as u32
}

pub(crate) fn build_stage_prompt(
    instructions: Option<&str>,
    running_summary: Option<&str>,
    transcript: &str,
) -> String {
    let base = instructions
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_INSTRUCTIONS);

    let mut prompt = base.to_string();
    if let Some(summary) = running_summary {
        prompt.push_str("\n\n<summary-so-far>\n");
        prompt.push_str(summary);
        prompt.push_str("\n</summary-so-far>");
    }
    prompt.push_str("\n\n<conversation>\n");
    prompt.push_str(transcript);
    prompt.push_str("\n</conversation>");
    prompt
}

/// Transcript for one stage. A chunk holding a single message too large to
/// summarize whole is structurally described with a bounded excerpt instead
/// of serialized in full, so the stage call itself cannot overflow.
fn stage_transcript(chunk: &Chunk, context_window: usize) -> String {
    if let [message] = chunk.messages.as_slice() {
        if TokenEstimator::is_oversized_for_summary(message, context_window) {
            return describe_oversized(message);
        }
    }
    serialize_conversation(&chunk.messages)
}

fn describe_oversized(message: &Message) -> String {
    let serialized = serialize_conversation(std::slice::from_ref(message));
    let excerpt: String = serialized.chars().take(OVERSIZE_EXCERPT_CHARS).collect();
    format!(
        "[Oversized {} message, ~{} estimated tokens; truncated excerpt follows]\n{excerpt}",
        message.role(),
        TokenEstimator::estimate_message(message),
    )
}

fn render_blocks(content: &Content) -> String {
    match content {
        Content::Text(text) => text.clone(),
        Content::Blocks(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.clone()),
                ContentBlock::Thinking { thinking } => Some(thinking.clone()),
                ContentBlock::ToolUse { name, .. } => Some(format!("[tool:{name}]")),
            })
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct MockProvider {
        responses: Mutex<VecDeque<anyhow::Result<crate::llm::SummarizeResponse>>>,
        prompts: Mutex<Vec<String>>,
    }

    impl MockProvider {
        fn new(responses: Vec<anyhow::Result<crate::llm::SummarizeResponse>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn always_failing() -> Self {
            Self {
                responses: Mutex::new(VecDeque::new()),
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().expect("lock poisoned").clone()
        }
    }

    #[async_trait::async_trait]
    impl SummaryProvider for MockProvider {
        async fn summarize(
            &self,
            request: SummarizeRequest,
        ) -> anyhow::Result<crate::llm::SummarizeResponse> {
            self.prompts
                .lock()
                .expect("lock poisoned")
                .push(request.prompt);
            self.responses
                .lock()
                .expect("lock poisoned")
                .pop_front()
                .unwrap_or_else(|| Err(anyhow!("Context overflow")))
        }
    }

    fn staged_request<'a>(
        messages: &'a [Message],
        signal: &'a CancellationToken,
    ) -> StagedSummaryRequest<'a> {
        StagedSummaryRequest {
            messages,
            api_key: "test-key",
            signal,
            reserve_tokens: 4000,
            max_chunk_tokens: 20_000,
            context_window: 100_000,
            custom_instructions: None,
            previous_summary: None,
        }
    }

    #[test]
    fn test_adaptive_ratio_decreases_with_history_size() {
        let small = vec![Message::user("x".repeat(4_000), 1)];
        let large: Vec<Message> = (1..=50)
            .map(|i| Message::user("x".repeat(8_000), i))
            .collect();

        let window = 100_000;
        let small_ratio = compute_adaptive_chunk_ratio(&small, window);
        let large_ratio = compute_adaptive_chunk_ratio(&large, window);

        assert!(small_ratio > large_ratio);
        for ratio in [small_ratio, large_ratio] {
            assert!((0.15..=0.5).contains(&ratio));
        }
    }

    #[test]
    fn test_adaptive_ratio_clamped_for_huge_histories() {
        let huge: Vec<Message> = (1..=100)
            .map(|i| Message::user("x".repeat(40_000), i))
            .collect();
        let ratio = compute_adaptive_chunk_ratio(&huge, 100_000);
        assert!((ratio - 0.15).abs() < f64::EPSILON);
    }

    #[test]
    fn test_serialize_conversation_role_prefixes() {
        let messages = vec![
            Message::user("read the config", 1),
            Message::assistant_with_tool_use(
                Some("on it".to_string()),
                "call_1",
                "read_file",
                serde_json::json!({"path": "cfg.toml"}),
                2,
            ),
            Message::tool_result("call_1", "read_file", "key = 1", false, 3),
            Message::BashExecution {
                command: "cargo test".to_string(),
                output: "ok".to_string(),
                exit_code: Some(0),
                cancelled: false,
                timestamp: 4,
            },
        ];

        let transcript = serialize_conversation(&messages);
        assert!(transcript.contains("[User]: read the config"));
        assert!(transcript.contains("[Assistant]: on it\n[tool:read_file]"));
        assert!(transcript.contains("[Tool result]: key = 1"));
        assert!(transcript.contains("[Bash]: cargo test (exit 0)\nok"));
    }

    #[test]
    fn test_structural_summary_counts_roles() {
        let messages = vec![
            Message::user("x".repeat(100_000), 1),
            Message::assistant("y".repeat(100_000), 2),
            Message::user("z".repeat(100_000), 3),
        ];

        let summary = structural_session_summary(&messages);
        assert!(summary.contains("Session contained"));
        assert!(summary.contains("3 messages"));
        assert!(summary.contains("tokens"));
        assert!(summary.contains("2 user"));
        assert!(summary.contains("1 assistant"));
    }

    #[tokio::test]
    async fn test_stages_thread_running_summary_forward() {
        // Two ~25k-token messages with a 20k chunk limit: two stages.
        let messages = vec![
            Message::user("x".repeat(100_000), 1),
            Message::assistant("y".repeat(100_000), 2),
        ];
        let provider = MockProvider::new(vec![
            Ok(crate::llm::SummarizeResponse::text("stage one summary")),
            Ok(crate::llm::SummarizeResponse::text("final summary")),
        ]);
        let signal = CancellationToken::new();

        let result = summarize_in_stages(&provider, &staged_request(&messages, &signal))
            .await
            .expect("summary");
        assert_eq!(result, "final summary");

        let prompts = provider.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(!prompts[0].contains("<summary-so-far>"));
        assert!(prompts[1].contains("stage one summary"));
    }

    #[tokio::test]
    async fn test_previous_summary_seeds_first_stage() {
        let messages = vec![Message::user("continue the refactor", 1)];
        let provider = MockProvider::new(vec![Ok(crate::llm::SummarizeResponse::text("updated"))]);
        let signal = CancellationToken::new();

        let mut request = staged_request(&messages, &signal);
        request.previous_summary = Some("earlier cycle summary");

        let result = summarize_in_stages(&provider, &request).await.expect("summary");
        assert_eq!(result, "updated");
        assert!(provider.prompts()[0].contains("earlier cycle summary"));
    }

    #[tokio::test]
    async fn test_custom_instructions_on_every_stage() {
        let messages = vec![
            Message::user("x".repeat(100_000), 1),
            Message::assistant("y".repeat(100_000), 2),
        ];
        let provider = MockProvider::new(vec![
            Ok(crate::llm::SummarizeResponse::text("s1")),
            Ok(crate::llm::SummarizeResponse::text("s2")),
        ]);
        let signal = CancellationToken::new();

        let mut request = staged_request(&messages, &signal);
        request.custom_instructions = Some("Focus on database schema changes.");

        summarize_in_stages(&provider, &request).await.expect("summary");
        for prompt in provider.prompts() {
            assert!(prompt.contains("Focus on database schema changes."));
        }
    }

    #[tokio::test]
    async fn test_oversized_message_described_structurally() {
        // ~60k tokens against a 100k window: above the 50% oversize bar.
        let messages = vec![Message::user("x".repeat(240_000), 1)];
        let provider = MockProvider::new(vec![Ok(crate::llm::SummarizeResponse::text("ok"))]);
        let signal = CancellationToken::new();

        summarize_in_stages(&provider, &staged_request(&messages, &signal))
            .await
            .expect("summary");

        let prompts = provider.prompts();
        assert!(prompts[0].contains("[Oversized user message"));
        // The excerpt is bounded; the full 240k chars never reach the prompt.
        assert!(prompts[0].len() < 10_000);
    }

    #[tokio::test]
    async fn test_provider_error_response_propagates() {
        let messages = vec![Message::user("hello", 1)];
        let provider = MockProvider::new(vec![Ok(crate::llm::SummarizeResponse::error(
            "input too long",
        ))]);
        let signal = CancellationToken::new();

        let err = summarize_in_stages(&provider, &staged_request(&messages, &signal))
            .await
            .expect_err("should fail");
        assert!(matches!(err, CompactionError::Provider(_)));
        assert!(err.to_string().contains("input too long"));
    }

    #[tokio::test]
    async fn test_abort_before_stage_fails_fast() {
        let messages = vec![Message::user("hello", 1)];
        let provider = MockProvider::new(vec![Ok(crate::llm::SummarizeResponse::text("unused"))]);
        let signal = CancellationToken::new();
        signal.cancel();

        let err = summarize_in_stages(&provider, &staged_request(&messages, &signal))
            .await
            .expect_err("should abort");
        assert!(err.is_abort());
        assert!(provider.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_fallback_returns_structural_summary_when_all_stages_fail() {
        let messages = vec![
            Message::user("x".repeat(100_000), 1),
            Message::assistant("y".repeat(100_000), 2),
            Message::user("z".repeat(100_000), 3),
        ];
        let provider = MockProvider::always_failing();
        let signal = CancellationToken::new();

        let result = summarize_with_fallback(&provider, &staged_request(&messages, &signal))
            .await
            .expect("fallback text");

        assert!(result.contains("Session contained"));
        assert!(result.contains("3 messages"));
        assert!(result.contains("2 user"));
        assert!(result.contains("1 assistant"));
        assert!(result.contains("tokens"));
        assert_ne!(result, "Summary unavailable due to size limits.");
    }

    #[tokio::test]
    async fn test_fallback_does_not_mask_abort() {
        let messages = vec![Message::user("hello", 1)];
        let provider = MockProvider::always_failing();
        let signal = CancellationToken::new();
        signal.cancel();

        let err = summarize_with_fallback(&provider, &staged_request(&messages, &signal))
            .await
            .expect_err("abort must propagate");
        assert!(err.is_abort());
    }
}
