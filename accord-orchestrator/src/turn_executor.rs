use crate::retry::backoff_delay;
use accord_core::{ChatMessage, DiscussionOptions, FinishReason, Role, TokenUsage, Turn};
use accord_provider::{ChatRequest, ModelProvider, RateLimiter, StreamFinishReason, StreamHandlers};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Block until the provider's rate limiter admits a call, sleeping for the
/// suggested delay between attempts. `acquire` itself never blocks; this
/// loop implements the turn executor's wait policy on top of it.
pub(crate) async fn acquire_permit(limiter: &RateLimiter) -> accord_provider::RateLimitPermit<'_> {
    loop {
        match limiter.acquire() {
            Ok(permit) => return permit,
            Err(err) => tokio::time::sleep(Duration::from_millis(err.retry_after_ms)).await,
        }
    }
}

const MAX_TURN_RETRIES: u32 = 2;

#[derive(Debug)]
pub enum TurnOutcome {
    Completed(Turn),
    Cancelled,
}

#[derive(Debug, Error)]
pub enum TurnExecutorError {
    #[error("turn timed out for role {role} in round {round} after {timeout_ms}ms")]
    Timeout {
        role: Role,
        round: u32,
        timeout_ms: u64,
    },
    #[error("turn failed for role {role} in round {round}: {message}")]
    Failed {
        role: Role,
        round: u32,
        message: String,
    },
}

fn normalize_finish_reason(reason: StreamFinishReason) -> FinishReason {
    match reason {
        StreamFinishReason::Stop => FinishReason::Stop,
        StreamFinishReason::Length => FinishReason::Length,
        StreamFinishReason::ContentFilter => FinishReason::ContentFilter,
        StreamFinishReason::ToolCalls => FinishReason::ToolCalls,
        StreamFinishReason::Error => FinishReason::Error,
    }
}

/// Issue a single streamed turn, retrying transient provider failures and
/// enforcing the per-turn deadline with a child cancellation scope so the
/// parent (overall-discussion) token is never tripped by a local timeout.
#[allow(clippy::too_many_arguments)]
pub async fn execute_turn(
    role: Role,
    round: u32,
    model_id: String,
    provider: Arc<dyn ModelProvider>,
    limiter: Arc<RateLimiter>,
    system_prompt: String,
    messages: Vec<ChatMessage>,
    options: &DiscussionOptions,
    parent_token: CancellationToken,
    on_chunk: impl Fn(&str) + Send + Sync + 'static,
) -> Result<TurnOutcome, TurnExecutorError> {
    let handlers = StreamHandlers::new(on_chunk);
    let mut attempt = 0u32;

    loop {
        let _permit = tokio::select! {
            _ = parent_token.cancelled() => return Ok(TurnOutcome::Cancelled),
            permit = acquire_permit(&limiter) => permit,
        };

        let child = parent_token.child_token();
        let request = ChatRequest {
            model_id: model_id.clone(),
            messages: messages.clone(),
            system_prompt: Some(system_prompt.clone()),
            temperature: Some(options.temperature),
            max_output_tokens: Some(options.max_tokens_per_turn),
            stop_sequences: vec![],
        };
        let started_at = Utc::now();
        let sleep = tokio::time::sleep(Duration::from_millis(options.turn_timeout_ms));
        tokio::pin!(sleep);
        let call = provider.stream_text(request, &handlers, child.clone());
        tokio::pin!(call);

        tokio::select! {
            _ = parent_token.cancelled() => {
                return Ok(TurnOutcome::Cancelled);
            }
            _ = &mut sleep => {
                child.cancel();
                return Err(TurnExecutorError::Timeout {
                    role,
                    round,
                    timeout_ms: options.turn_timeout_ms,
                });
            }
            result = &mut call => {
                if parent_token.is_cancelled() {
                    return Ok(TurnOutcome::Cancelled);
                }
                match result {
                    Ok(response) => {
                        let duration_ms = (Utc::now() - started_at)
                            .num_milliseconds()
                            .max(0) as u64;
                        let turn = Turn {
                            id: Turn::id_for(role, round, started_at.timestamp_millis()),
                            role,
                            round_number: round,
                            content: response.text,
                            started_at,
                            duration_ms,
                            token_usage: TokenUsage {
                                prompt_tokens: response.usage.prompt_tokens,
                                completion_tokens: response.usage.completion_tokens,
                            },
                            finish_reason: normalize_finish_reason(response.finish_reason),
                        };
                        return Ok(TurnOutcome::Completed(turn));
                    }
                    Err(err) if err.retryable() && attempt < MAX_TURN_RETRIES => {
                        let delay = backoff_delay(attempt, err.retry_after_ms());
                        warn!(role = %role, round, attempt, delay_ms = delay.as_millis() as u64,
                            "retrying turn after provider error: {}", err);
                        attempt += 1;
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    Err(err) => {
                        return Err(TurnExecutorError::Failed {
                            role,
                            round,
                            message: err.to_string(),
                        });
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_provider::MockProvider;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unlimited_limiter() -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(4, 10))
    }

    #[tokio::test]
    async fn successful_turn_produces_a_turn_record() {
        let provider: Arc<dyn ModelProvider> = Arc::new(MockProvider::new("mock", "hello world"));
        let options = DiscussionOptions::default();
        let outcome = execute_turn(
            Role::A,
            1,
            "mock-model".into(),
            provider,
            unlimited_limiter(),
            "system".into(),
            vec![ChatMessage::user("hi")],
            &options,
            CancellationToken::new(),
            |_| {},
        )
        .await
        .unwrap();

        match outcome {
            TurnOutcome::Completed(turn) => {
                assert_eq!(turn.content, "hello world");
                assert_eq!(turn.round_number, 1);
                assert!(turn.id.starts_with("turn_1_A_"));
            }
            TurnOutcome::Cancelled => panic!("expected completion"),
        }
    }

    #[tokio::test]
    async fn parent_cancellation_short_circuits_to_cancelled() {
        let provider: Arc<dyn ModelProvider> = Arc::new(MockProvider::new("mock", "hello world"));
        let options = DiscussionOptions::default();
        let parent = CancellationToken::new();
        parent.cancel();
        let outcome = execute_turn(
            Role::A,
            1,
            "mock-model".into(),
            provider,
            unlimited_limiter(),
            "system".into(),
            vec![],
            &options,
            parent,
            |_| {},
        )
        .await
        .unwrap();
        assert!(matches!(outcome, TurnOutcome::Cancelled));
    }

    #[tokio::test]
    async fn chunk_callback_is_invoked_for_every_chunk() {
        let provider: Arc<dyn ModelProvider> = Arc::new(MockProvider::new("mock", "a b c"));
        let options = DiscussionOptions::default();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        execute_turn(
            Role::B,
            1,
            "mock-model".into(),
            provider,
            unlimited_limiter(),
            "system".into(),
            vec![],
            &options,
            CancellationToken::new(),
            move |_| {
                count_clone.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await
        .unwrap();
        assert!(count.load(Ordering::SeqCst) >= 3);
    }
}
