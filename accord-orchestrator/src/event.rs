use accord_core::{
    ConsensusResult, ConsensusVote, DiscussionConfig, DiscussionId, FinalConsensus, Role, Round,
    StoppingReason, TokenUsage, Turn,
};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    pub role: Option<String>,
    pub round_number: Option<u32>,
    pub recoverable: bool,
}

/// One entry of the discussion's event stream. `event_name` gives the
/// kebab-case SSE event line; `Serialize` on the whole struct produces the
/// `data:` JSON payload (including a `type` discriminant matching the event
/// name, plus the shared `discussionId`/`timestamp` fields every event
/// carries).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum EventPayload {
    DiscussionStarted { config: DiscussionConfig },
    RoundStarted { round_number: u32 },
    TurnStarted { role: Role, model_id: String, provider_id: String, round_number: u32 },
    TurnChunk { role: Role, chunk: String },
    TurnCompleted { turn: Turn },
    ConsensusCheckStarted { round_number: u32 },
    ConsensusVote { vote: ConsensusVote },
    ConsensusResult { result: ConsensusResult },
    RoundCompleted { round: Round },
    DiscussionCompleted {
        stopping_reason: StoppingReason,
        final_consensus: Option<FinalConsensus>,
        total_tokens_used: TokenUsage,
        duration_ms: u64,
    },
    DiscussionError { error: ErrorPayload },
    DiscussionAborted { reason: StoppingReason },
}

impl EventPayload {
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::DiscussionStarted { .. } => "discussion-started",
            EventPayload::RoundStarted { .. } => "round-started",
            EventPayload::TurnStarted { .. } => "turn-started",
            EventPayload::TurnChunk { .. } => "turn-chunk",
            EventPayload::TurnCompleted { .. } => "turn-completed",
            EventPayload::ConsensusCheckStarted { .. } => "consensus-check-started",
            EventPayload::ConsensusVote { .. } => "consensus-vote",
            EventPayload::ConsensusResult { .. } => "consensus-result",
            EventPayload::RoundCompleted { .. } => "round-completed",
            EventPayload::DiscussionCompleted { .. } => "discussion-completed",
            EventPayload::DiscussionError { .. } => "discussion-error",
            EventPayload::DiscussionAborted { .. } => "discussion-aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventPayload::DiscussionCompleted { .. }
                | EventPayload::DiscussionError { .. }
                | EventPayload::DiscussionAborted { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub discussion_id: DiscussionId,
    pub timestamp: i64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(discussion_id: DiscussionId, timestamp: i64, payload: EventPayload) -> Self {
        Self {
            discussion_id,
            timestamp,
            payload,
        }
    }

    pub fn name(&self) -> &'static str {
        self.payload.name()
    }

    pub fn is_terminal(&self) -> bool {
        self.payload.is_terminal()
    }
}
