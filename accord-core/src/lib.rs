//! Shared type definitions, configuration, and error taxonomy for the discussion
//! orchestrator.
//!
//! This crate has no async runtime dependencies of its own beyond what is needed
//! to load configuration from disk; it is the leaf dependency every other
//! `accord-*` crate builds on.

mod config;
mod error;
mod types;

pub use config::*;
pub use error::*;
pub use types::*;
