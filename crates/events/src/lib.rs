//! Posting events and the post-commit event bus.
//!
//! Events describe effects that have already been committed. Nothing is
//! published for a unit of work that aborted.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::EventBus;
pub use envelope::{EventEnvelope, PostingEnvelope};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus, Subscription};
