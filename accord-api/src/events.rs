use accord_orchestrator::Event;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::warn;

/// In-process typed broadcaster for one discussion's event stream. Dispatch
/// is synchronous and happens in subscription order; a slow or disconnected
/// subscriber is dropped rather than allowed to apply back-pressure to the
/// orchestrator.
pub struct EventBus {
    subscribers: Mutex<Vec<(u64, mpsc::UnboundedSender<Event>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a new subscriber, returning its handle and the receiving end
    /// of a fresh channel. Pass the handle to [`EventBus::unsubscribe`] to
    /// stop delivery early (e.g. on client disconnect).
    pub fn subscribe(&self) -> (u64, mpsc::UnboundedReceiver<Event>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push((id, tx));
        (id, rx)
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().unwrap().retain(|(sub_id, _)| *sub_id != id);
    }

    /// Deliver one event to every current subscriber. A subscriber whose
    /// receiver has been dropped is pruned rather than logged as an error;
    /// that is the normal shape of a client that closed its connection.
    pub fn publish(&self, event: Event) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Pump events from the orchestrator's channel onto the bus until the
/// channel closes (which happens once the orchestrator's background task
/// drops its sender, i.e. after the terminal event has been sent).
pub async fn pump_to_bus(mut rx: mpsc::UnboundedReceiver<Event>, bus: std::sync::Arc<EventBus>) {
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        bus.publish(event);
        if terminal {
            break;
        }
    }
    if bus.subscriber_count() > 0 {
        warn!("event bus still has subscribers after discussion terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_core::DiscussionId;
    use accord_orchestrator::EventPayload;

    fn sample_event() -> Event {
        Event::new(DiscussionId::new(), 0, EventPayload::RoundStarted { round_number: 1 })
    }

    #[test]
    fn publish_reaches_all_subscribers() {
        let bus = EventBus::new();
        let (_, mut rx_a) = bus.subscribe();
        let (_, mut rx_b) = bus.subscribe();
        bus.publish(sample_event());
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (id, mut rx) = bus.subscribe();
        bus.unsubscribe(id);
        bus.publish(sample_event());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receiver_is_pruned_on_next_publish() {
        let bus = EventBus::new();
        let (_, rx) = bus.subscribe();
        drop(rx);
        bus.publish(sample_event());
        assert_eq!(bus.subscriber_count(), 0);
    }
}
