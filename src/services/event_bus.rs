//! Event bus: broadcasts [`EventFrame`]s to every subscriber of a DAG run
//! (`spec.md` §6 event stream frames).
//!
//! Ported from the teacher's `EventBus` (`services/event_bus.rs`): a
//! `tokio::sync::broadcast` channel with a monotonic sequence counter per
//! event, simplified down to the single concern this mediator needs —
//! the teacher's event store persistence and cross-process correlation
//! plumbing has no counterpart here, since every event frame is already
//! persisted as part of its owning [`crate::domain::models::ExecutionTrace`].

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::broadcast;

use crate::domain::models::{Event, EventFrame};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(pub u64);

/// A broadcast [`EventFrame`] tagged with its position in the stream.
#[derive(Debug, Clone)]
pub struct SequencedFrame {
    pub sequence: SequenceNumber,
    pub frame: EventFrame,
}

#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { channel_capacity: 1024 }
    }
}

/// Fan-out point for a single DAG run's event stream. Every `gateway`
/// operation that drives a run publishes here; every caller watching the
/// run (the original stdio transport, a `continue` poller) subscribes.
pub struct EventBus {
    sender: broadcast::Sender<SequencedFrame>,
    sequence: AtomicU64,
}

impl EventBus {
    #[must_use]
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self { sender, sequence: AtomicU64::new(0) }
    }

    /// Publishes an event, ignoring the case where there are currently no
    /// subscribers (a lagging or not-yet-attached caller simply misses it;
    /// the durable record of the run remains the persisted trace).
    pub fn publish(&self, event: Event) -> SequenceNumber {
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);
        let sequence = SequenceNumber(seq);
        let _ = self.sender.send(SequencedFrame { sequence, frame: EventFrame::new(event) });
        sequence
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SequencedFrame> {
        self.sender.subscribe()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[must_use]
    pub fn current_sequence(&self) -> SequenceNumber {
        SequenceNumber(self.sequence.load(Ordering::SeqCst))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn published_events_are_delivered_to_subscribers_in_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let dag_run_id = Uuid::new_v4();

        bus.publish(Event::DagStart { dag_run_id, task_count: 3 });
        bus.publish(Event::DagEnd { dag_run_id, success: true });

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, SequenceNumber(0));
        assert_eq!(second.sequence, SequenceNumber(1));
        assert!(matches!(first.frame.event, Event::DagStart { .. }));
        assert!(matches!(second.frame.event, Event::DagEnd { .. }));
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(Event::DagStart { dag_run_id: Uuid::new_v4(), task_count: 1 });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_every_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(Event::DagStart { dag_run_id: Uuid::new_v4(), task_count: 1 });

        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }
}
