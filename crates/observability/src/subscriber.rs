//! Tracing subscriber initialization.
//!
//! JSON lines with timestamps. The filter comes from `RUST_LOG` and falls back
//! to the directive given by the caller.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber.
///
/// Returns `false` when a subscriber was already installed (the call is then a no-op).
pub fn init(default_filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .with_current_span(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_initialization_is_a_no_op() {
        let _ = init(DEFAULT_FILTER);
        assert!(!init("debug"));
        tracing::info!("still logging after a repeated init");
    }
}
