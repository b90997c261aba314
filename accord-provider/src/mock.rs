use crate::{
    ChatRequest, FinalResponse, ModelProvider, ProviderError, StreamFinishReason, StreamHandlers,
    StreamUsage,
};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Deterministic provider used by orchestrator and API tests. Streams the
/// canned response back in fixed-size word chunks so chunk-ordering
/// invariants can be exercised without a real vendor dependency.
pub struct MockProvider {
    id: String,
    response: String,
}

impl MockProvider {
    pub fn new(id: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            response: response.into(),
        }
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn initialize(&self, _api_key: Option<String>) -> Result<(), ProviderError> {
        Ok(())
    }

    async fn stream_text(
        &self,
        _request: ChatRequest,
        handlers: &StreamHandlers,
        cancellation: CancellationToken,
    ) -> Result<FinalResponse, ProviderError> {
        let start = std::time::Instant::now();
        let mut emitted = String::new();
        for word in self.response.split_inclusive(' ') {
            if cancellation.is_cancelled() {
                return Err(ProviderError::Timeout);
            }
            (handlers.on_chunk)(word);
            emitted.push_str(word);
            tokio::task::yield_now().await;
        }

        Ok(FinalResponse {
            text: emitted,
            usage: StreamUsage {
                prompt_tokens: 32,
                completion_tokens: (self.response.split_whitespace().count() as u32).max(1),
            },
            finish_reason: StreamFinishReason::Stop,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}
