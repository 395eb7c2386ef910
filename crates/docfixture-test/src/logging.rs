//! Test logging utilities
//!
//! Provides utilities for initializing logging in test environments.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize logging for tests (call once)
///
/// Installs a `tracing` fmt subscriber that writes through the test harness,
/// filtered by `RUST_LOG` (default `warn`). Safe to call from every test.
///
/// # Examples
///
/// ```
/// use docfixture_test::logging::init_test_logging;
///
/// // In your test:
/// init_test_logging();
/// // Your test code
/// ```
pub fn init_test_logging() {
	INIT.call_once(|| {
		let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
		let _ = tracing_subscriber::fmt()
			.with_env_filter(filter)
			.with_test_writer()
			.try_init();
	});
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_init_installs_a_global_subscriber_once() {
		init_test_logging();
		init_test_logging();

		assert!(tracing::dispatcher::has_been_set());
		tracing::warn!("logging initialized");
	}
}
