//! Process-wide tracing setup shared by every binary.

pub mod subscriber;

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    subscriber::init(subscriber::DEFAULT_FILTER);
}
