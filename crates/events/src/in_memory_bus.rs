//! In-process posting feed for tests/dev.

use std::collections::HashSet;
use std::sync::{Mutex, mpsc};

use tradebook_core::AggregateId;

use crate::bus::EventBus;
use crate::envelope::PostingEnvelope;

#[derive(Debug, thiserror::Error)]
pub enum InMemoryBusError {
    #[error("event bus lock poisoned")]
    Poisoned,
}

/// Receiving end of [`InMemoryEventBus::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    receiver: mpsc::Receiver<PostingEnvelope>,
}

impl Subscription {
    /// Everything delivered so far, in publish order.
    pub fn drain(&self) -> Vec<PostingEnvelope> {
        self.receiver.try_iter().collect()
    }
}

#[derive(Debug, Default)]
struct Feed {
    delivered: HashSet<(AggregateId, u64)>,
    subscribers: Vec<mpsc::Sender<PostingEnvelope>>,
}

/// Fan-out bus that delivers each `(aggregate_id, sequence_number)` once.
///
/// A republished envelope (same stream position) is acknowledged but not
/// delivered again. Dropped subscribers are pruned on the next delivery.
#[derive(Debug, Default)]
pub struct InMemoryEventBus {
    feed: Mutex<Feed>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Result<Subscription, InMemoryBusError> {
        let (tx, receiver) = mpsc::channel();
        self.feed
            .lock()
            .map_err(|_| InMemoryBusError::Poisoned)?
            .subscribers
            .push(tx);
        Ok(Subscription { receiver })
    }
}

impl EventBus for InMemoryEventBus {
    type Error = InMemoryBusError;

    fn publish(&self, envelope: PostingEnvelope) -> Result<(), Self::Error> {
        let mut feed = self.feed.lock().map_err(|_| InMemoryBusError::Poisoned)?;
        let key = (envelope.aggregate_id(), envelope.sequence_number());
        if !feed.delivered.insert(key) {
            return Ok(());
        }
        feed.subscribers
            .retain(|tx| tx.send(envelope.clone()).is_ok());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventEnvelope;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn envelope(stream: AggregateId, sequence: u64) -> PostingEnvelope {
        EventEnvelope::new(
            Uuid::now_v7(),
            stream,
            "inventory.record",
            "inventory.record.changed",
            sequence,
            Utc::now(),
            json!({ "sequence": sequence }),
        )
    }

    #[test]
    fn every_subscriber_receives_every_position() {
        let bus = InMemoryEventBus::new();
        let a = bus.subscribe().unwrap();
        let b = bus.subscribe().unwrap();
        let stream = AggregateId::new();

        bus.publish(envelope(stream, 1)).unwrap();
        bus.publish(envelope(stream, 2)).unwrap();

        let seen: Vec<u64> = a.drain().iter().map(|e| e.sequence_number()).collect();
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(b.drain().len(), 2);
    }

    #[test]
    fn republished_positions_are_delivered_once() {
        let bus = InMemoryEventBus::new();
        let sub = bus.subscribe().unwrap();
        let stream = AggregateId::new();

        bus.publish(envelope(stream, 1)).unwrap();
        bus.publish(envelope(stream, 1)).unwrap();
        bus.publish(envelope(AggregateId::new(), 1)).unwrap();

        assert_eq!(sub.drain().len(), 2);
    }

    #[test]
    fn dropped_subscribers_do_not_fail_publish() {
        let bus = InMemoryEventBus::new();
        drop(bus.subscribe().unwrap());
        assert!(bus.publish(envelope(AggregateId::new(), 1)).is_ok());
    }
}
