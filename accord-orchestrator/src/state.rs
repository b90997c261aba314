use accord_core::Phase;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub from: Phase,
    pub to: Phase,
    pub at: DateTime<Utc>,
}

fn allowed(from: Phase, to: Phase) -> bool {
    use Phase::*;
    matches!(
        (from, to),
        (Idle, Initializing)
            | (Initializing, TurnA)
            | (Initializing, Error)
            | (TurnA, TurnB)
            | (TurnA, Error)
            | (TurnA, Aborted)
            | (TurnB, ConsensusA)
            | (TurnB, TurnA)
            | (TurnB, Error)
            | (TurnB, Aborted)
            | (ConsensusA, ConsensusB)
            | (ConsensusA, Error)
            | (ConsensusA, Aborted)
            | (ConsensusB, TurnA)
            | (ConsensusB, Completed)
            | (ConsensusB, Error)
            | (ConsensusB, Aborted)
            | (Error, Idle)
            | (Aborted, Idle)
    )
}

/// Holds no domain data beyond the current phase and its transition history;
/// gates every move the orchestrator makes against the table in `allowed`.
#[derive(Debug, Clone)]
pub struct StateMachine {
    phase: Phase,
    history: Vec<TransitionRecord>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            history: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn history(&self) -> &[TransitionRecord] {
        &self.history
    }

    pub fn can_transition(&self, to: Phase) -> bool {
        allowed(self.phase, to)
    }

    pub fn is_active(&self) -> bool {
        self.phase.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn transition(&mut self, to: Phase) -> Result<(), StateTransitionError> {
        if !self.can_transition(to) {
            return Err(StateTransitionError {
                from: self.phase,
                to,
            });
        }
        self.history.push(TransitionRecord {
            from: self.phase,
            to,
            at: Utc::now(),
        });
        self.phase = to;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
        self.history.clear();
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("illegal transition from {from:?} to {to:?}")]
pub struct StateTransitionError {
    pub from: Phase,
    pub to: Phase,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_round_trip() {
        let mut machine = StateMachine::new();
        machine.transition(Phase::Initializing).unwrap();
        machine.transition(Phase::TurnA).unwrap();
        machine.transition(Phase::TurnB).unwrap();
        machine.transition(Phase::ConsensusA).unwrap();
        machine.transition(Phase::ConsensusB).unwrap();
        machine.transition(Phase::TurnA).unwrap();
        assert_eq!(machine.phase(), Phase::TurnA);
        assert_eq!(machine.history().len(), 6);
    }

    #[test]
    fn completed_is_terminal_and_reachable_only_from_consensus_b() {
        let mut machine = StateMachine::new();
        machine.transition(Phase::Initializing).unwrap();
        machine.transition(Phase::TurnA).unwrap();
        assert!(machine.transition(Phase::Completed).is_err());
        machine.transition(Phase::TurnB).unwrap();
        machine.transition(Phase::ConsensusA).unwrap();
        machine.transition(Phase::ConsensusB).unwrap();
        machine.transition(Phase::Completed).unwrap();
        assert!(machine.is_terminal());
    }

    #[test]
    fn reset_clears_history_and_returns_to_idle() {
        let mut machine = StateMachine::new();
        machine.transition(Phase::Initializing).unwrap();
        machine.reset();
        assert_eq!(machine.phase(), Phase::Idle);
        assert!(machine.history().is_empty());
    }

    #[test]
    fn error_and_aborted_only_reset_via_idle() {
        let mut machine = StateMachine::new();
        machine.transition(Phase::Initializing).unwrap();
        machine.transition(Phase::Error).unwrap();
        assert!(machine.transition(Phase::TurnA).is_err());
        machine.transition(Phase::Idle).unwrap();
        assert_eq!(machine.phase(), Phase::Idle);
    }

    const ALL_PHASES: [Phase; 9] = [
        Phase::Idle,
        Phase::Initializing,
        Phase::TurnA,
        Phase::TurnB,
        Phase::ConsensusA,
        Phase::ConsensusB,
        Phase::Completed,
        Phase::Error,
        Phase::Aborted,
    ];

    use proptest::prop_assert_eq;

    proptest::proptest! {
        #[test]
        fn rejected_transitions_never_mutate_state(
            from_idx in 0usize..ALL_PHASES.len(),
            to_idx in 0usize..ALL_PHASES.len(),
        ) {
            let from = ALL_PHASES[from_idx];
            let to = ALL_PHASES[to_idx];
            let mut machine = StateMachine { phase: from, history: Vec::new() };
            let before_len = machine.history().len();
            if machine.transition(to).is_err() {
                prop_assert_eq!(machine.phase(), from);
                prop_assert_eq!(machine.history().len(), before_len);
            } else {
                prop_assert_eq!(machine.phase(), to);
                prop_assert_eq!(machine.history().len(), before_len + 1);
            }
        }
    }
}
