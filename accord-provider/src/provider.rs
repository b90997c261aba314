use accord_core::ChatMessage;
use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Normalized provider error taxonomy. Vendor SDKs are expected to map their
/// own error types onto these variants at the adapter boundary.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("authentication failed")]
    AuthError,
    #[error("rate limited, retry after {retry_after_ms:?}ms")]
    RateLimit { retry_after_ms: Option<u64> },
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("request timed out")]
    Timeout,
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("context length exceeded")]
    ContextLength,
    #[error("content filtered")]
    ContentFilter,
    #[error("validation error: {0}")]
    ValidationError(String),
    #[error("provider error: {0}")]
    ProviderError(String),
    #[error("unknown provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    pub fn code(&self) -> &'static str {
        match self {
            ProviderError::AuthError => "AUTH_ERROR",
            ProviderError::RateLimit { .. } => "RATE_LIMIT",
            ProviderError::ConnectionError(_) => "CONNECTION_ERROR",
            ProviderError::Timeout => "TIMEOUT",
            ProviderError::ModelNotFound(_) => "MODEL_NOT_FOUND",
            ProviderError::ContextLength => "CONTEXT_LENGTH",
            ProviderError::ContentFilter => "CONTENT_FILTER",
            ProviderError::ValidationError(_) => "VALIDATION_ERROR",
            ProviderError::ProviderError(_) => "PROVIDER_ERROR",
            ProviderError::Unknown(_) => "UNKNOWN",
        }
    }

    /// Whether the turn executor's retry policy should reattempt this call.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimit { .. }
                | ProviderError::ConnectionError(_)
                | ProviderError::Timeout
                | ProviderError::ProviderError(_)
        )
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            ProviderError::RateLimit { retry_after_ms } => *retry_after_ms,
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model_id: String,
    pub messages: Vec<ChatMessage>,
    pub system_prompt: Option<String>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
    pub stop_sequences: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StreamUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct FinalResponse {
    pub text: String,
    pub usage: StreamUsage,
    pub finish_reason: StreamFinishReason,
    pub duration_ms: u64,
}

/// Callbacks invoked while a streamed generation is in flight. `on_chunk` may
/// be invoked many times from within the provider's own async context, so it
/// must be cheap and non-blocking.
pub struct StreamHandlers {
    pub on_chunk: Box<dyn Fn(&str) + Send + Sync>,
}

impl StreamHandlers {
    pub fn new(on_chunk: impl Fn(&str) + Send + Sync + 'static) -> Self {
        Self {
            on_chunk: Box::new(on_chunk),
        }
    }
}

/// Capability every model vendor adapter must implement. Kept intentionally
/// thin: the turn executor owns timeout and retry behavior, the provider only
/// speaks to the vendor API.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn provider_id(&self) -> &str;

    async fn initialize(&self, api_key: Option<String>) -> Result<(), ProviderError>;

    async fn stream_text(
        &self,
        request: ChatRequest,
        handlers: &StreamHandlers,
        cancellation: CancellationToken,
    ) -> Result<FinalResponse, ProviderError>;
}
