use thiserror::Error;

/// Top-level error taxonomy for a discussion run. Every variant carries a
/// wire-level code (see [`DiscussionError::code`]) and a recoverability flag
/// consumed by the `discussion-error` event payload.
#[derive(Debug, Error)]
pub enum DiscussionError {
    #[error("discussion initialization failed: {0}")]
    InitializationFailed(String),

    #[error("turn failed for role {role} in round {round}: {message}")]
    TurnFailed {
        role: String,
        round: u32,
        message: String,
    },

    #[error("turn timed out for role {role} in round {round} after {timeout_ms}ms")]
    TurnTimeout {
        role: String,
        round: u32,
        timeout_ms: u64,
    },

    #[error("failed to parse consensus response: {0}")]
    ConsensusParseFailed(String),

    #[error("provider error from {provider_id}: {message}")]
    ProviderError { provider_id: String, message: String },

    #[error("illegal state transition from {from} to {to}")]
    StateInvalid { from: String, to: String },

    #[error("discussion exceeded total timeout of {timeout_ms}ms")]
    DiscussionTimeout { timeout_ms: u64 },

    #[error("unknown error: {0}")]
    Unknown(String),
}

impl DiscussionError {
    /// SCREAMING_SNAKE_CASE code carried in the `discussion-error` event, per
    /// the error taxonomy.
    pub fn code(&self) -> &'static str {
        match self {
            DiscussionError::InitializationFailed(_) => "INITIALIZATION_FAILED",
            DiscussionError::TurnFailed { .. } => "TURN_FAILED",
            DiscussionError::TurnTimeout { .. } => "TURN_TIMEOUT",
            DiscussionError::ConsensusParseFailed(_) => "CONSENSUS_PARSE_FAILED",
            DiscussionError::ProviderError { .. } => "PROVIDER_ERROR",
            DiscussionError::StateInvalid { .. } => "STATE_INVALID",
            DiscussionError::DiscussionTimeout { .. } => "DISCUSSION_TIMEOUT",
            DiscussionError::Unknown(_) => "UNKNOWN",
        }
    }

    /// Whether the UI should offer a retry. Only the detector's own internal
    /// retry loop is "recoverable" in the sense of not ending the run; once an
    /// error reaches this type the discussion has already stopped, so this
    /// reflects whether starting a *new* discussion is likely to succeed.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            DiscussionError::ProviderError { .. } | DiscussionError::TurnTimeout { .. }
        )
    }

    pub fn role(&self) -> Option<&str> {
        match self {
            DiscussionError::TurnFailed { role, .. } => Some(role),
            DiscussionError::TurnTimeout { role, .. } => Some(role),
            _ => None,
        }
    }

    pub fn round(&self) -> Option<u32> {
        match self {
            DiscussionError::TurnFailed { round, .. } => Some(*round),
            DiscussionError::TurnTimeout { round, .. } => Some(*round),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_wire_taxonomy() {
        assert_eq!(
            DiscussionError::InitializationFailed("x".into()).code(),
            "INITIALIZATION_FAILED"
        );
        assert_eq!(
            DiscussionError::DiscussionTimeout { timeout_ms: 1000 }.code(),
            "DISCUSSION_TIMEOUT"
        );
    }

    #[test]
    fn provider_error_is_recoverable_but_state_invalid_is_not() {
        assert!(DiscussionError::ProviderError {
            provider_id: "p".into(),
            message: "m".into()
        }
        .recoverable());
        assert!(!DiscussionError::StateInvalid {
            from: "a".into(),
            to: "b".into()
        }
        .recoverable());
    }
}
