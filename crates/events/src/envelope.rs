use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use tradebook_core::AggregateId;

use crate::Event;

/// Envelope for a committed event, carrying stream metadata.
///
/// `sequence_number` is the aggregate version reached by applying the event,
/// so consumers can discard duplicates delivered by at-least-once buses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,
    aggregate_id: AggregateId,
    aggregate_type: String,
    event_type: String,
    sequence_number: u64,
    occurred_at: DateTime<Utc>,
    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        sequence_number: u64,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            event_type: event_type.into(),
            sequence_number,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn aggregate_id(&self) -> AggregateId {
        self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

/// The envelope the posting engine publishes: JSON payload, typed metadata.
pub type PostingEnvelope = EventEnvelope<JsonValue>;

impl EventEnvelope<JsonValue> {
    /// Wrap a typed event as a JSON envelope for transport.
    pub fn from_typed<E>(
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        event: &E,
    ) -> Result<Self, serde_json::Error>
    where
        E: Event + Serialize,
    {
        let payload = serde_json::to_value(event)?;
        Ok(Self::new(
            Uuid::now_v7(),
            aggregate_id,
            aggregate_type,
            event.event_type(),
            sequence_number,
            event.occurred_at(),
            payload,
        ))
    }

    /// Decode the payload back into a typed event.
    pub fn decode<E>(&self) -> Result<E, serde_json::Error>
    where
        E: serde::de::DeserializeOwned,
    {
        serde_json::from_value(self.payload.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pinged {
        at: DateTime<Utc>,
        note: String,
    }

    impl Event for Pinged {
        fn event_type(&self) -> &'static str {
            "test.pinged"
        }

        fn version(&self) -> u32 {
            1
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn typed_envelope_carries_event_metadata() {
        let ev = Pinged {
            at: Utc::now(),
            note: "hello".to_string(),
        };
        let id = AggregateId::new();
        let env = EventEnvelope::from_typed(id, "test.aggregate", 7, &ev).unwrap();

        assert_eq!(env.aggregate_id(), id);
        assert_eq!(env.aggregate_type(), "test.aggregate");
        assert_eq!(env.event_type(), "test.pinged");
        assert_eq!(env.sequence_number(), 7);
        assert_eq!(env.occurred_at(), ev.at);
        assert_eq!(env.decode::<Pinged>().unwrap(), ev);
    }
}
