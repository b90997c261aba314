use crate::consensus_detector::run_consensus_check;
use crate::event::{Event, EventPayload, ErrorPayload};
use crate::state::{StateMachine, StateTransitionError};
use crate::turn_executor::{execute_turn, TurnExecutorError, TurnOutcome};
use accord_core::{
    DiscussionConfig, DiscussionError, DiscussionId, FinalConsensus, Phase, Role, Round,
    StoppingReason, TokenUsage, Transcript,
};
use accord_protocol::build_turn_messages;
use accord_provider::ProviderRegistry;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Drives a single discussion's round loop. One instance is meant to run one
/// discussion at a time; `start` rejects a second concurrent call on the same
/// instance. Running several discussions concurrently means constructing
/// several `Orchestrator`s, each against the same shared `ProviderRegistry`.
pub struct Orchestrator {
    registry: Arc<ProviderRegistry>,
    active: AtomicBool,
}

impl Orchestrator {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            active: AtomicBool::new(false),
        }
    }

    /// Allocate a `DiscussionId` and spawn the round loop in the background,
    /// returning the id immediately so a caller (e.g. the HTTP layer) can
    /// hand it to the client before the first event has even been produced.
    /// Events are delivered on `events` as they occur; the stream always
    /// ends with exactly one terminal event. `cancellation`, when tripped by
    /// the caller, aborts the run with `StoppingReason::UserAbort`.
    pub fn start(
        self: Arc<Self>,
        config: DiscussionConfig,
        events: UnboundedSender<Event>,
        cancellation: CancellationToken,
    ) -> DiscussionId {
        let discussion_id = DiscussionId::new();

        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            let error = DiscussionError::StateInvalid {
                from: "running".to_string(),
                to: "running".to_string(),
            };
            let _ = events.send(Event::new(
                discussion_id.clone(),
                now_millis(),
                EventPayload::DiscussionError {
                    error: ErrorPayload {
                        code: error.code(),
                        message: "this orchestrator instance is already running a discussion"
                            .to_string(),
                        role: None,
                        round_number: None,
                        recoverable: error.recoverable(),
                    },
                },
            ));
            return discussion_id;
        }

        let id_for_task = discussion_id.clone();
        tokio::spawn(async move {
            self.run_with_total_timeout(id_for_task, config, events, cancellation)
                .await;
            self.active.store(false, Ordering::SeqCst);
        });

        discussion_id
    }

    async fn run_with_total_timeout(
        &self,
        discussion_id: DiscussionId,
        config: DiscussionConfig,
        events: UnboundedSender<Event>,
        cancellation: CancellationToken,
    ) {
        let total_timeout = Duration::from_millis(config.options.total_timeout_ms);

        let run = self.run_loop(discussion_id.clone(), config, events.clone(), cancellation.clone());
        tokio::pin!(run);
        tokio::select! {
            _ = tokio::time::sleep(total_timeout) => {
                cancellation.cancel();
                let error = DiscussionError::DiscussionTimeout {
                    timeout_ms: total_timeout.as_millis() as u64,
                };
                error!(discussion_id = %discussion_id, "{}", error);
                let _ = events.send(Event::new(
                    discussion_id.clone(),
                    now_millis(),
                    EventPayload::DiscussionError {
                        error: ErrorPayload {
                            code: error.code(),
                            message: error.to_string(),
                            role: None,
                            round_number: None,
                            recoverable: error.recoverable(),
                        },
                    },
                ));
            }
            _ = &mut run => {}
        }
    }

    async fn run_loop(
        &self,
        discussion_id: DiscussionId,
        config: DiscussionConfig,
        events: UnboundedSender<Event>,
        cancellation: CancellationToken,
    ) {
        let start_time = Utc::now();
        let mut state = StateMachine::new();
        let mut transcript = Transcript::default();
        let mut token_totals = TokenUsage::default();

        let provider_a = match self.registry.get(&config.participant_a.provider_id) {
            Ok(p) => p,
            Err(err) => {
                self.fail_init(&discussion_id, &events, err.to_string());
                return;
            }
        };
        let provider_b = match self.registry.get(&config.participant_b.provider_id) {
            Ok(p) => p,
            Err(err) => {
                self.fail_init(&discussion_id, &events, err.to_string());
                return;
            }
        };
        let limiter_a = match self.registry.rate_limiter(&config.participant_a.provider_id) {
            Ok(l) => l,
            Err(err) => {
                self.fail_init(&discussion_id, &events, err.to_string());
                return;
            }
        };
        let limiter_b = match self.registry.rate_limiter(&config.participant_b.provider_id) {
            Ok(l) => l,
            Err(err) => {
                self.fail_init(&discussion_id, &events, err.to_string());
                return;
            }
        };

        if state.transition(Phase::Initializing).is_err() {
            self.fail_init(&discussion_id, &events, "invalid initial transition".into());
            return;
        }

        let _ = events.send(Event::new(
            discussion_id.clone(),
            now_millis(),
            EventPayload::DiscussionStarted {
                config: config.clone(),
            },
        ));

        let mut stopping_reason = StoppingReason::MaxIterations;
        let mut final_consensus = None;

        'rounds: for round_number in 1..=config.options.max_iterations {
            if cancellation.is_cancelled() {
                stopping_reason = StoppingReason::UserAbort;
                break;
            }

            if let Err(err) = state.transition(Phase::TurnA) {
                self.fail_state_invalid(&discussion_id, &events, err);
                return;
            }
            let _ = events.send(Event::new(
                discussion_id.clone(),
                now_millis(),
                EventPayload::RoundStarted { round_number },
            ));
            let _ = events.send(Event::new(
                discussion_id.clone(),
                now_millis(),
                EventPayload::TurnStarted {
                    role: Role::A,
                    model_id: config.participant_a.model_id.clone(),
                    provider_id: config.participant_a.provider_id.clone(),
                    round_number,
                },
            ));

            let turn_a = match self
                .run_turn(
                    Role::A,
                    round_number,
                    &config,
                    Arc::clone(&provider_a),
                    Arc::clone(&limiter_a),
                    &transcript,
                    &discussion_id,
                    &events,
                    cancellation.clone(),
                )
                .await
            {
                Ok(Some(turn)) => turn,
                Ok(None) => {
                    stopping_reason = StoppingReason::UserAbort;
                    break 'rounds;
                }
                Err(err) => {
                    self.fail(&discussion_id, &events, &mut state, err);
                    return;
                }
            };
            token_totals += turn_a.token_usage;
            transcript.push_turn(&turn_a);

            if let Err(err) = state.transition(Phase::TurnB) {
                self.fail_state_invalid(&discussion_id, &events, err);
                return;
            }
            let _ = events.send(Event::new(
                discussion_id.clone(),
                now_millis(),
                EventPayload::TurnStarted {
                    role: Role::B,
                    model_id: config.participant_b.model_id.clone(),
                    provider_id: config.participant_b.provider_id.clone(),
                    round_number,
                },
            ));

            let turn_b = match self
                .run_turn(
                    Role::B,
                    round_number,
                    &config,
                    Arc::clone(&provider_b),
                    Arc::clone(&limiter_b),
                    &transcript,
                    &discussion_id,
                    &events,
                    cancellation.clone(),
                )
                .await
            {
                Ok(Some(turn)) => turn,
                Ok(None) => {
                    stopping_reason = StoppingReason::UserAbort;
                    break 'rounds;
                }
                Err(err) => {
                    self.fail(&discussion_id, &events, &mut state, err);
                    return;
                }
            };
            token_totals += turn_b.token_usage;
            transcript.push_turn(&turn_b);

            if let Err(err) = state.transition(Phase::ConsensusA) {
                self.fail_state_invalid(&discussion_id, &events, err);
                return;
            }
            let _ = events.send(Event::new(
                discussion_id.clone(),
                now_millis(),
                EventPayload::ConsensusCheckStarted { round_number },
            ));

            let events_for_votes = events.clone();
            let discussion_id_for_votes = discussion_id.clone();
            let consensus_result = run_consensus_check(
                round_number,
                config.options.min_rounds_before_consensus,
                config.options.require_both_consensus,
                &transcript.message_history,
                &config.participant_a.model_id,
                &provider_a,
                &limiter_a,
                &config.participant_b.model_id,
                &provider_b,
                &limiter_b,
                cancellation.clone(),
                |vote| {
                    let _ = events_for_votes.send(Event::new(
                        discussion_id_for_votes.clone(),
                        now_millis(),
                        EventPayload::ConsensusVote { vote: vote.clone() },
                    ));
                },
            )
            .await;

            if let Err(err) = state.transition(Phase::ConsensusB) {
                self.fail_state_invalid(&discussion_id, &events, err);
                return;
            }
            let _ = events.send(Event::new(
                discussion_id.clone(),
                now_millis(),
                EventPayload::ConsensusResult {
                    result: consensus_result.clone(),
                },
            ));

            let is_unanimous = consensus_result.is_unanimous;
            let round = Round {
                number: round_number,
                turn_a,
                turn_b,
                consensus: Some(consensus_result.clone()),
            };
            let _ = events.send(Event::new(
                discussion_id.clone(),
                now_millis(),
                EventPayload::RoundCompleted { round: round.clone() },
            ));
            transcript.rounds.push(round);

            if is_unanimous {
                let last_round = transcript.rounds.last().unwrap();
                final_consensus = Some(FinalConsensus {
                    solution: consensus_result
                        .final_solution
                        .clone()
                        .unwrap_or_default(),
                    achieved_at_round: round_number,
                    model_a_contribution: last_round.turn_a.content.clone(),
                    model_b_contribution: last_round.turn_b.content.clone(),
                });
                if let Err(err) = state.transition(Phase::Completed) {
                    self.fail_state_invalid(&discussion_id, &events, err);
                    return;
                }
                stopping_reason = StoppingReason::ConsensusReached;
                break 'rounds;
            }

            if round_number < config.options.max_iterations {
                if let Err(err) = state.transition(Phase::TurnA) {
                    self.fail_state_invalid(&discussion_id, &events, err);
                    return;
                }
            }
        }

        let duration_ms = (Utc::now() - start_time).num_milliseconds().max(0) as u64;

        match stopping_reason {
            StoppingReason::UserAbort => {
                if let Err(err) = state.transition(Phase::Aborted) {
                    self.fail_state_invalid(&discussion_id, &events, err);
                    return;
                }
                let _ = events.send(Event::new(
                    discussion_id.clone(),
                    now_millis(),
                    EventPayload::DiscussionAborted {
                        reason: StoppingReason::UserAbort,
                    },
                ));
            }
            _ => {
                let _ = events.send(Event::new(
                    discussion_id.clone(),
                    now_millis(),
                    EventPayload::DiscussionCompleted {
                        stopping_reason,
                        final_consensus,
                        total_tokens_used: token_totals,
                        duration_ms,
                    },
                ));
            }
        }

        info!(discussion_id = %discussion_id, ?stopping_reason, "discussion finished");
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_turn(
        &self,
        role: Role,
        round_number: u32,
        config: &DiscussionConfig,
        provider: Arc<dyn accord_provider::ModelProvider>,
        limiter: Arc<accord_provider::RateLimiter>,
        transcript: &Transcript,
        discussion_id: &DiscussionId,
        events: &UnboundedSender<Event>,
        cancellation: CancellationToken,
    ) -> Result<Option<accord_core::Turn>, DiscussionError> {
        let (system_prompt, messages) =
            build_turn_messages(role, config, round_number, &transcript.message_history);
        let model_id = match role {
            Role::A => config.participant_a.model_id.clone(),
            Role::B => config.participant_b.model_id.clone(),
        };

        let events_for_chunks = events.clone();
        let discussion_id_for_chunks = discussion_id.clone();
        let outcome = execute_turn(
            role,
            round_number,
            model_id,
            provider,
            limiter,
            system_prompt,
            messages,
            &config.options,
            cancellation,
            move |chunk| {
                let _ = events_for_chunks.send(Event::new(
                    discussion_id_for_chunks.clone(),
                    now_millis(),
                    EventPayload::TurnChunk {
                        role,
                        chunk: chunk.to_string(),
                    },
                ));
            },
        )
        .await
        .map_err(|err| match err {
            TurnExecutorError::Timeout {
                role,
                round,
                timeout_ms,
            } => DiscussionError::TurnTimeout {
                role: role.to_string(),
                round,
                timeout_ms,
            },
            TurnExecutorError::Failed {
                role,
                round,
                message,
            } => DiscussionError::TurnFailed {
                role: role.to_string(),
                round,
                message,
            },
        })?;

        match outcome {
            TurnOutcome::Completed(turn) => {
                let _ = events.send(Event::new(
                    discussion_id.clone(),
                    now_millis(),
                    EventPayload::TurnCompleted { turn: turn.clone() },
                ));
                Ok(Some(turn))
            }
            TurnOutcome::Cancelled => Ok(None),
        }
    }

    fn fail_init(&self, discussion_id: &DiscussionId, events: &UnboundedSender<Event>, message: String) {
        let error = DiscussionError::InitializationFailed(message);
        error!(discussion_id = %discussion_id, "{}", error);
        let _ = events.send(Event::new(
            discussion_id.clone(),
            now_millis(),
            EventPayload::DiscussionError {
                error: ErrorPayload {
                    code: error.code(),
                    message: error.to_string(),
                    role: None,
                    round_number: None,
                    recoverable: error.recoverable(),
                },
            },
        ));
    }

    /// Routes an illegal state transition into the same fatal
    /// `discussion-error` path as any other unrecoverable failure. Reaching
    /// here means the orchestrator asked the state machine for a move the
    /// table rejects, which is always a bug, not a runtime condition.
    fn fail_state_invalid(
        &self,
        discussion_id: &DiscussionId,
        events: &UnboundedSender<Event>,
        err: StateTransitionError,
    ) {
        let error = DiscussionError::StateInvalid {
            from: format!("{:?}", err.from),
            to: format!("{:?}", err.to),
        };
        error!(discussion_id = %discussion_id, "{}", error);
        let _ = events.send(Event::new(
            discussion_id.clone(),
            now_millis(),
            EventPayload::DiscussionError {
                error: ErrorPayload {
                    code: error.code(),
                    message: error.to_string(),
                    role: None,
                    round_number: None,
                    recoverable: error.recoverable(),
                },
            },
        ));
    }

    fn fail(
        &self,
        discussion_id: &DiscussionId,
        events: &UnboundedSender<Event>,
        state: &mut StateMachine,
        err: DiscussionError,
    ) {
        if let Err(state_err) = state.transition(Phase::Error) {
            warn!(discussion_id = %discussion_id, "could not record error phase transition: {}", state_err);
        }
        error!(discussion_id = %discussion_id, "discussion failed: {}", err);
        let _ = events.send(Event::new(
            discussion_id.clone(),
            now_millis(),
            EventPayload::DiscussionError {
                error: ErrorPayload {
                    code: err.code(),
                    message: err.to_string(),
                    role: err.role().map(|r| r.to_string()),
                    round_number: err.round(),
                    recoverable: err.recoverable(),
                },
            },
        ));
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_core::{DiscussionOptions, Participant};
    use accord_provider::MockProvider;
    use tokio::sync::mpsc;

    fn config_with(options: DiscussionOptions) -> DiscussionConfig {
        DiscussionConfig {
            prompt: "How should we design a rate limiter?".to_string(),
            participant_a: Participant {
                role: Role::A,
                model_id: "model-a".into(),
                provider_id: "mock-a".into(),
                display_name: None,
            },
            participant_b: Participant {
                role: Role::B,
                model_id: "model-b".into(),
                provider_id: "mock-b".into(),
                display_name: None,
            },
            options,
        }
    }

    fn registry_with_consensus(agree: bool) -> Arc<ProviderRegistry> {
        let registry = ProviderRegistry::new();
        let verdict = if agree { "YES" } else { "NO" };
        let solution = if agree {
            "Use a token bucket limiter with per-client buckets."
        } else {
            "No consensus yet."
        };
        let response = format!(
            "[CONSENSUS_CHECK]\nHAS_CONSENSUS: {}\n[CONFIDENCE]\n90\n[REASONING]\nfine\n\
             [PROPOSED_SOLUTION]\n{}",
            verdict, solution
        );
        registry
            .register(Arc::new(MockProvider::new("mock-a", response.clone())))
            .unwrap();
        registry
            .register(Arc::new(MockProvider::new("mock-b", response)))
            .unwrap();
        Arc::new(registry)
    }

    async fn drain_until_terminal(rx: &mut mpsc::UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn reaches_consensus_and_emits_terminal_completed_event() {
        let mut options = DiscussionOptions::default();
        options.min_rounds_before_consensus = 1;
        options.max_iterations = 3;
        let config = config_with(options);
        let registry = registry_with_consensus(true);
        let orchestrator = Arc::new(Orchestrator::new(registry));
        let (tx, mut rx) = mpsc::unbounded_channel();

        orchestrator.start(config, tx, CancellationToken::new());
        let events = drain_until_terminal(&mut rx).await;

        let names: Vec<&str> = events.iter().map(|e| e.name()).collect();
        assert!(
            names.contains(&"discussion-completed"),
            "events: {:?}",
            names
        );
        assert_eq!(*names.first().unwrap(), "discussion-started");
        assert_eq!(*names.last().unwrap(), "discussion-completed");
    }

    #[tokio::test]
    async fn exhausts_max_iterations_when_consensus_never_reached() {
        let mut options = DiscussionOptions::default();
        options.min_rounds_before_consensus = 1;
        options.max_iterations = 2;
        let config = config_with(options);
        let registry = registry_with_consensus(false);
        let orchestrator = Arc::new(Orchestrator::new(registry));
        let (tx, mut rx) = mpsc::unbounded_channel();

        orchestrator.start(config, tx, CancellationToken::new());
        let events = drain_until_terminal(&mut rx).await;

        let round_starts = events
            .iter()
            .filter(|e| matches!(e.payload, EventPayload::RoundStarted { .. }))
            .count();
        let stopping_reason = events.iter().find_map(|e| match &e.payload {
            EventPayload::DiscussionCompleted { stopping_reason, .. } => Some(*stopping_reason),
            _ => None,
        });
        assert_eq!(round_starts, 2);
        assert_eq!(stopping_reason, Some(StoppingReason::MaxIterations));
    }

    #[tokio::test]
    async fn unknown_provider_fails_initialization() {
        let mut options = DiscussionOptions::default();
        options.min_rounds_before_consensus = 1;
        let mut config = config_with(options);
        config.participant_a.provider_id = "does-not-exist".into();
        let registry = Arc::new(ProviderRegistry::new());
        let orchestrator = Arc::new(Orchestrator::new(registry));
        let (tx, mut rx) = mpsc::unbounded_channel();

        orchestrator.start(config, tx, CancellationToken::new());
        let event = rx.recv().await.unwrap();
        assert_eq!(event.name(), "discussion-error");
    }
}
