use crate::events::EventBus;
use accord_orchestrator::Event;
use axum::http::{header, HeaderName};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::IntoResponse;
use futures::stream::Stream;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Drops its subscription and trips `cancellation` when the SSE response
/// body is dropped, whether because the stream ran to completion or because
/// the client disconnected mid-discussion.
struct StreamGuard {
    bus: Arc<EventBus>,
    subscriber_id: u64,
    cancellation: CancellationToken,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.subscriber_id);
        self.cancellation.cancel();
    }
}

fn to_sse_event(event: &Event) -> SseEvent {
    let data = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    SseEvent::default().event(event.name()).data(data)
}

fn event_stream(
    bus: Arc<EventBus>,
    cancellation: CancellationToken,
) -> impl Stream<Item = Result<SseEvent, Infallible>> {
    let (subscriber_id, mut rx) = bus.subscribe();
    let guard = StreamGuard {
        bus,
        subscriber_id,
        cancellation,
    };

    async_stream::stream! {
        let _guard = guard;
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            yield Ok(to_sse_event(&event));
            if terminal {
                tokio::time::sleep(Duration::from_millis(100)).await;
                break;
            }
        }
    }
}

/// Build the SSE response body for one discussion: subscribes to `bus`,
/// streams every event as it is published, and closes 100ms after the
/// terminal event so the final frame has time to flush. Client disconnect
/// (the returned stream being dropped) aborts the discussion via
/// `cancellation`. The response disables intermediary buffering so chunks
/// reach the client as they're published rather than batched.
pub fn discussion_stream(
    bus: Arc<EventBus>,
    cancellation: CancellationToken,
) -> impl IntoResponse {
    let sse: Sse<_> = Sse::new(event_stream(bus, cancellation)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    );

    (
        [
            (header::CACHE_CONTROL, "no-cache, no-transform"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        sse,
    )
}
