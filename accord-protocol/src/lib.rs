//! Message construction and response parsing for the discussion protocol:
//! the exact system prompts sent to each role, and the structured-with-
//! fallback parser that turns a model's free-text reply into a
//! [`accord_core::ConsensusVote`].

mod codec;
mod consensus;

pub use codec::*;
pub use consensus::*;
