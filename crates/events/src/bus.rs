//! Post-commit event publishing.
//!
//! The store is the source of truth; the bus only announces what a committed
//! unit did. Delivery is at-least-once, keyed by `(aggregate_id, sequence_number)`.

use std::sync::Arc;

use crate::envelope::PostingEnvelope;

/// A sink for committed posting events.
///
/// ```text
/// Posting unit → Store (commit) → EventBus::publish → Consumers
/// ```
///
/// A failed publish cannot undo the unit; callers log it and move on.
pub trait EventBus: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    fn publish(&self, envelope: PostingEnvelope) -> Result<(), Self::Error>;
}

impl<B> EventBus for Arc<B>
where
    B: EventBus + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, envelope: PostingEnvelope) -> Result<(), Self::Error> {
        (**self).publish(envelope)
    }
}
