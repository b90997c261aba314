//! HTTP surface for the discussion orchestrator: a `POST /discussions`
//! endpoint that validates and starts a run, and a `GET
//! /discussions/:id/events` endpoint that streams its event feed over
//! Server-Sent Events.
//!
//! The HTTP routing itself is a thin shell; the orchestration and event
//! semantics it exposes live in `accord-orchestrator`. This crate's own
//! responsibility is bridging that crate's `mpsc` event channel onto an
//! in-process [`events::EventBus`] that can fan out to SSE subscribers, and
//! framing events per the wire format in the discussion protocol.

mod events;
mod rest;
mod sse;

pub use events::EventBus;
pub use rest::{DiscussionApi, RestApiConfig};
