use serde::{Deserialize, Serialize};

/// One summarization request.
#[derive(Debug, Clone)]
pub struct SummarizeRequest {
    /// Full prompt text: instructions plus the serialized transcript.
    pub prompt: String,
    /// System prompt steering the summarizer persona.
    pub system_prompt: String,
    /// Upper bound on requested output tokens.
    pub max_output_tokens: u32,
    /// Credential resolved for the target model.
    pub api_key: String,
}

/// Completed summarization call.
#[derive(Debug, Clone)]
pub struct SummarizeResponse {
    pub text: String,
    pub stop_reason: StopReason,
    pub error_message: Option<String>,
}

impl SummarizeResponse {
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            stop_reason: StopReason::EndTurn,
            error_message: None,
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            text: String::new(),
            stop_reason: StopReason::Error,
            error_message: Some(message.into()),
        }
    }

    /// Returns true when the provider flagged this call as failed.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.stop_reason == StopReason::Error
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    Error,
}

/// Handle to a resolved model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub provider: String,
    pub id: String,
}

impl ModelRef {
    #[must_use]
    pub fn new(provider: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            id: id.into(),
        }
    }
}

impl std::fmt::Display for ModelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.id)
    }
}

/// Model lookup, context-window sizing, and credential resolution,
/// implemented by the calling runtime.
pub trait ModelRegistry: Send + Sync {
    fn find(&self, provider: &str, model_id: &str) -> Option<ModelRef>;
    fn context_window_tokens(&self, model: &ModelRef) -> usize;
    fn api_key_for(&self, model: &ModelRef) -> Option<String>;
}
