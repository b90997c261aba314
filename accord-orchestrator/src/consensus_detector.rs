use crate::turn_executor::acquire_permit;
use accord_core::{ConsensusResult, ConsensusVote, Role, TranscriptMessage};
use accord_protocol::{build_consensus_messages, parse_vote, MAX_CONSENSUS_RETRIES};
use accord_provider::{ChatRequest, ModelProvider, RateLimiter, StreamHandlers};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const CONSENSUS_TEMPERATURE: f32 = 0.3;
const CONSENSUS_MAX_TOKENS: u32 = 1024;

fn skipped_vote(role: Role) -> ConsensusVote {
    ConsensusVote {
        role,
        has_consensus: false,
        confidence: 0,
        reasoning: "Minimum rounds not yet completed".to_string(),
        proposed_solution: None,
        voted_at: Utc::now(),
    }
}

fn fabricated_vote(role: Role, reason: &str) -> ConsensusVote {
    ConsensusVote {
        role,
        has_consensus: false,
        confidence: 0,
        reasoning: format!("Failed to obtain valid consensus response: {}", reason),
        proposed_solution: None,
        voted_at: Utc::now(),
    }
}

async fn request_vote(
    role: Role,
    model_id: &str,
    provider: &Arc<dyn ModelProvider>,
    limiter: &Arc<RateLimiter>,
    message_history: &[TranscriptMessage],
    cancellation: CancellationToken,
) -> ConsensusVote {
    let handlers = StreamHandlers::new(|_| {});
    let mut last_error = String::new();

    for attempt in 0..=MAX_CONSENSUS_RETRIES {
        let (system_prompt, messages) = build_consensus_messages(message_history, attempt);
        let request = ChatRequest {
            model_id: model_id.to_string(),
            messages,
            system_prompt: Some(system_prompt),
            temperature: Some(CONSENSUS_TEMPERATURE),
            max_output_tokens: Some(CONSENSUS_MAX_TOKENS),
            stop_sequences: vec![],
        };

        let _permit = tokio::select! {
            _ = cancellation.cancelled() => return fabricated_vote(role, "cancelled while waiting for rate limit"),
            permit = acquire_permit(limiter) => permit,
        };
        let response = match provider
            .stream_text(request, &handlers, cancellation.clone())
            .await
        {
            Ok(response) => response,
            Err(err) => {
                last_error = err.to_string();
                warn!(role = %role, attempt, "consensus request failed: {}", last_error);
                continue;
            }
        };

        match parse_vote(&response.text) {
            Ok(parsed) => {
                return ConsensusVote {
                    role,
                    has_consensus: parsed.has_consensus,
                    confidence: parsed.confidence,
                    reasoning: parsed.reasoning,
                    proposed_solution: parsed.proposed_solution,
                    voted_at: Utc::now(),
                };
            }
            Err(err) => {
                last_error = err.to_string();
                warn!(role = %role, attempt, "consensus response unparseable: {}", last_error);
            }
        }
    }

    fabricated_vote(role, &last_error)
}

fn select_final_solution(vote_a: &ConsensusVote, vote_b: &ConsensusVote) -> Option<String> {
    match (&vote_a.proposed_solution, &vote_b.proposed_solution) {
        (Some(a), Some(b)) => {
            if vote_b.confidence > vote_a.confidence {
                Some(b.clone())
            } else {
                Some(a.clone())
            }
        }
        (Some(a), None) => Some(a.clone()),
        (None, Some(b)) => Some(b.clone()),
        (None, None) => Some("Consensus reached but solution text not extracted.".to_string()),
    }
}

/// Run the consensus check for one round: either synthesize skipped votes (if
/// the minimum-rounds gate hasn't opened yet) or request both sides' votes
/// sequentially, so B never sees A's vote while forming its own.
#[allow(clippy::too_many_arguments)]
pub async fn run_consensus_check(
    round_number: u32,
    min_rounds_before_consensus: u32,
    require_both_consensus: bool,
    message_history: &[TranscriptMessage],
    model_id_a: &str,
    provider_a: &Arc<dyn ModelProvider>,
    limiter_a: &Arc<RateLimiter>,
    model_id_b: &str,
    provider_b: &Arc<dyn ModelProvider>,
    limiter_b: &Arc<RateLimiter>,
    cancellation: CancellationToken,
    mut on_vote: impl FnMut(&ConsensusVote),
) -> ConsensusResult {
    if round_number < min_rounds_before_consensus {
        let vote_a = skipped_vote(Role::A);
        let vote_b = skipped_vote(Role::B);
        on_vote(&vote_a);
        on_vote(&vote_b);
        return ConsensusResult {
            round_number,
            vote_a,
            vote_b,
            is_unanimous: false,
            final_solution: None,
        };
    }

    let vote_a = request_vote(
        Role::A,
        model_id_a,
        provider_a,
        limiter_a,
        message_history,
        cancellation.clone(),
    )
    .await;
    on_vote(&vote_a);
    let vote_b = request_vote(
        Role::B,
        model_id_b,
        provider_b,
        limiter_b,
        message_history,
        cancellation,
    )
    .await;
    on_vote(&vote_b);

    let is_unanimous = if require_both_consensus {
        vote_a.has_consensus && vote_b.has_consensus
    } else {
        vote_a.has_consensus || vote_b.has_consensus
    };

    let final_solution = if is_unanimous {
        select_final_solution(&vote_a, &vote_b)
    } else {
        None
    };

    ConsensusResult {
        round_number,
        vote_a,
        vote_b,
        is_unanimous,
        final_solution,
    }
}
