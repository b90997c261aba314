//! Drives a two-model discussion through its turn-taking and consensus-voting
//! lifecycle and emits the resulting event stream.
//!
//! The pieces compose bottom-up: [`state::StateMachine`] gates phase
//! transitions, [`turn_executor::execute_turn`] issues one streamed model
//! call with retry and timeout handling, [`consensus_detector::run_consensus_check`]
//! requests and interprets both sides' votes, and [`orchestrator::Orchestrator`]
//! assembles all three into the round loop described by the discussion
//! protocol, emitting an [`event::Event`] at each step.

pub mod consensus_detector;
pub mod event;
pub mod orchestrator;
pub mod retry;
pub mod state;
pub mod turn_executor;

pub use event::{Event, EventPayload, ErrorPayload};
pub use orchestrator::Orchestrator;
pub use state::{StateMachine, StateTransitionError, TransitionRecord};
pub use turn_executor::{TurnExecutorError, TurnOutcome};
