use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier for a single discussion run. Opaque, unique, assigned once at
/// start and never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscussionId(pub String);

impl DiscussionId {
    pub fn new() -> Self {
        Self(format!("disc_{}", uuid::Uuid::new_v4().simple()))
    }
}

impl Default for DiscussionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DiscussionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DiscussionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The two sides of a discussion. Exactly one participant of each role exists
/// per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "A")]
    A,
    #[serde(rename = "B")]
    B,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::A => Role::B,
            Role::B => Role::A,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::A => "Model A",
            Role::B => "Model B",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::A => write!(f, "A"),
            Role::B => write!(f, "B"),
        }
    }
}

/// A model participant bound to one role for the lifetime of a discussion.
/// Immutable once the discussion starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub role: Role,
    pub model_id: String,
    pub provider_id: String,
    pub display_name: Option<String>,
}

/// Tunable knobs for a discussion run. All fields are validated against the
/// ranges in [`DiscussionOptions::validate`] before a discussion is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscussionOptions {
    pub max_iterations: u32,
    pub temperature: f32,
    pub max_tokens_per_turn: u32,
    pub turn_timeout_ms: u64,
    pub total_timeout_ms: u64,
    pub require_both_consensus: bool,
    pub min_rounds_before_consensus: u32,
}

impl Default for DiscussionOptions {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            temperature: 0.7,
            max_tokens_per_turn: 2048,
            turn_timeout_ms: 60_000,
            total_timeout_ms: 600_000,
            require_both_consensus: true,
            min_rounds_before_consensus: 2,
        }
    }
}

impl DiscussionOptions {
    /// Merge a partial set of overrides onto the defaults, matching the
    /// `options?: partial-of-options` shape of the start request.
    pub fn merged(overrides: PartialDiscussionOptions) -> Self {
        let defaults = Self::default();
        Self {
            max_iterations: overrides.max_iterations.unwrap_or(defaults.max_iterations),
            temperature: overrides.temperature.unwrap_or(defaults.temperature),
            max_tokens_per_turn: overrides
                .max_tokens_per_turn
                .unwrap_or(defaults.max_tokens_per_turn),
            turn_timeout_ms: overrides.turn_timeout_ms.unwrap_or(defaults.turn_timeout_ms),
            total_timeout_ms: overrides
                .total_timeout_ms
                .unwrap_or(defaults.total_timeout_ms),
            require_both_consensus: overrides
                .require_both_consensus
                .unwrap_or(defaults.require_both_consensus),
            min_rounds_before_consensus: overrides
                .min_rounds_before_consensus
                .unwrap_or(defaults.min_rounds_before_consensus),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(2..=20).contains(&self.max_iterations) {
            return Err("maxIterations must be between 2 and 20".into());
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err("temperature must be between 0 and 2".into());
        }
        if !(256..=8192).contains(&self.max_tokens_per_turn) {
            return Err("maxTokensPerTurn must be between 256 and 8192".into());
        }
        if !(1..=5).contains(&self.min_rounds_before_consensus) {
            return Err("minRoundsBeforeConsensus must be between 1 and 5".into());
        }
        Ok(())
    }
}

/// Optional overrides supplied by the caller; absent fields fall back to
/// [`DiscussionOptions::default`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialDiscussionOptions {
    pub max_iterations: Option<u32>,
    pub temperature: Option<f32>,
    pub max_tokens_per_turn: Option<u32>,
    pub turn_timeout_ms: Option<u64>,
    pub total_timeout_ms: Option<u64>,
    pub require_both_consensus: Option<bool>,
    pub min_rounds_before_consensus: Option<u32>,
}

/// Frozen configuration for a single run, accepted once at start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscussionConfig {
    pub prompt: String,
    pub participant_a: Participant,
    pub participant_b: Participant,
    pub options: DiscussionOptions,
}

impl DiscussionConfig {
    pub const MIN_PROMPT_LEN: usize = 10;
    pub const MAX_PROMPT_LEN: usize = 10_000;

    pub fn validate(&self) -> Result<(), String> {
        let trimmed = self.prompt.trim();
        if trimmed.len() < Self::MIN_PROMPT_LEN || trimmed.len() > Self::MAX_PROMPT_LEN {
            return Err(format!(
                "prompt must be between {} and {} characters",
                Self::MIN_PROMPT_LEN,
                Self::MAX_PROMPT_LEN
            ));
        }
        self.options.validate()
    }
}

/// Role within a provider-facing chat message, distinct from [`Role`] (which
/// identifies a discussion participant, not a message's position in the
/// conversation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single message in the request sent to a [`crate`]-external model
/// provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Normalized terminal state of a model call, matching the provider's
/// `finishReason` vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
}

/// Token accounting for a single model call.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl std::ops::Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
        }
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        *self = *self + rhs;
    }
}

/// A completed model utterance. Immutable once constructed by the turn
/// executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: String,
    pub role: Role,
    pub round_number: u32,
    pub content: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub token_usage: TokenUsage,
    pub finish_reason: FinishReason,
}

impl Turn {
    pub fn id_for(role: Role, round: u32, started_at_millis: i64) -> String {
        format!("turn_{}_{}_{}", round, role, started_at_millis)
    }
}

/// One side's structured verdict on whether the discussion has converged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusVote {
    pub role: Role,
    pub has_consensus: bool,
    pub confidence: u8,
    pub reasoning: String,
    pub proposed_solution: Option<String>,
    pub voted_at: DateTime<Utc>,
}

/// The combined outcome of both sides' votes for a round.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusResult {
    pub round_number: u32,
    pub vote_a: ConsensusVote,
    pub vote_b: ConsensusVote,
    pub is_unanimous: bool,
    pub final_solution: Option<String>,
}

/// One full round: both turns plus an optional consensus check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub number: u32,
    pub turn_a: Turn,
    pub turn_b: Turn,
    pub consensus: Option<ConsensusResult>,
}

/// A single transcript entry, tagged with the role that produced it, used to
/// build the shared message history both models see.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptMessage {
    pub role: Role,
    pub content: String,
}

/// The discussion's shared dialogue, append-only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    pub rounds: Vec<Round>,
    pub message_history: Vec<TranscriptMessage>,
}

impl Transcript {
    pub fn push_turn(&mut self, turn: &Turn) {
        self.message_history.push(TranscriptMessage {
            role: turn.role,
            content: format!("[{}] {}", turn.role.label(), turn.content),
        });
    }
}

/// Final agreed-upon outcome, recorded once unanimity is reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalConsensus {
    pub solution: String,
    pub achieved_at_round: u32,
    pub model_a_contribution: String,
    pub model_b_contribution: String,
}

/// Why a discussion stopped producing rounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoppingReason {
    ConsensusReached,
    MaxIterations,
    UserAbort,
    Error,
    Timeout,
    ModelUnavailable,
}

/// The discussion state machine's phases. See `accord_orchestrator::state`
/// for the transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Idle,
    Initializing,
    TurnA,
    TurnB,
    ConsensusA,
    ConsensusB,
    Completed,
    Error,
    Aborted,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Completed | Phase::Error | Phase::Aborted)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal() && self != Phase::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prop_assert_eq;

    #[test]
    fn discussion_id_display_roundtrip() {
        let id = DiscussionId("disc_abc123".to_string());
        assert_eq!(format!("{}", id), "disc_abc123");
        let from: DiscussionId = "disc_abc123".to_string().into();
        assert_eq!(from.0, "disc_abc123");
    }

    #[test]
    fn role_other_is_involutive() {
        assert_eq!(Role::A.other(), Role::B);
        assert_eq!(Role::B.other().other(), Role::B);
    }

    #[test]
    fn options_validate_rejects_out_of_range_temperature() {
        let mut opts = DiscussionOptions::default();
        opts.temperature = 2.5;
        assert!(opts.validate().is_err());
    }

    #[test]
    fn options_validate_accepts_boundary_values() {
        let mut opts = DiscussionOptions::default();
        opts.max_iterations = 2;
        opts.min_rounds_before_consensus = 5;
        opts.max_tokens_per_turn = 256;
        assert!(opts.validate().is_ok());
        opts.max_iterations = 20;
        opts.max_tokens_per_turn = 8192;
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn merged_overrides_only_replace_given_fields() {
        let overrides = PartialDiscussionOptions {
            temperature: Some(1.2),
            ..Default::default()
        };
        let merged = DiscussionOptions::merged(overrides);
        assert_eq!(merged.temperature, 1.2);
        assert_eq!(merged.max_iterations, DiscussionOptions::default().max_iterations);
    }

    #[test]
    fn config_validate_rejects_short_prompt() {
        let config = DiscussionConfig {
            prompt: "short".to_string(),
            participant_a: Participant {
                role: Role::A,
                model_id: "m".into(),
                provider_id: "p".into(),
                display_name: None,
            },
            participant_b: Participant {
                role: Role::B,
                model_id: "m".into(),
                provider_id: "p".into(),
                display_name: None,
            },
            options: DiscussionOptions::default(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn transcript_push_turn_tags_origin_role() {
        let mut transcript = Transcript::default();
        let turn = Turn {
            id: "turn_1_A_0".into(),
            role: Role::A,
            round_number: 1,
            content: "hello".into(),
            started_at: Utc::now(),
            duration_ms: 5,
            token_usage: TokenUsage::default(),
            finish_reason: FinishReason::Stop,
        };
        transcript.push_turn(&turn);
        assert_eq!(transcript.message_history.len(), 1);
        assert!(transcript.message_history[0].content.starts_with("[Model A]"));
    }

    #[test]
    fn phase_terminal_and_active_classification() {
        assert!(Phase::Completed.is_terminal());
        assert!(!Phase::Completed.is_active());
        assert!(Phase::TurnA.is_active());
        assert!(!Phase::Idle.is_active());
    }

    #[test]
    fn token_usage_accumulates() {
        let mut total = TokenUsage::default();
        total += TokenUsage { prompt_tokens: 10, completion_tokens: 20 };
        total += TokenUsage { prompt_tokens: 5, completion_tokens: 5 };
        assert_eq!(total.total(), 40);
    }

    proptest::proptest! {
        #[test]
        fn token_usage_total_matches_sum_of_parts(
            prompt in 0u32..1_000_000,
            completion in 0u32..1_000_000,
        ) {
            let usage = TokenUsage { prompt_tokens: prompt, completion_tokens: completion };
            prop_assert_eq!(usage.total(), prompt + completion);
        }

        #[test]
        fn token_usage_add_is_commutative(
            a_prompt in 0u32..10_000, a_completion in 0u32..10_000,
            b_prompt in 0u32..10_000, b_completion in 0u32..10_000,
        ) {
            let a = TokenUsage { prompt_tokens: a_prompt, completion_tokens: a_completion };
            let b = TokenUsage { prompt_tokens: b_prompt, completion_tokens: b_completion };
            prop_assert_eq!((a + b).total(), (b + a).total());
        }
    }
}
