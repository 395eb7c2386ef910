//! rstest fixtures
//!
//! [`memory_harness`] gives every test its own [`MemoryServer`] and
//! [`ConnectionManager`]. With the `testcontainers` feature,
//! [`mongodb_container`] starts a real MongoDB instead.

#[cfg(feature = "testcontainers")]
mod mongo;

#[cfg(feature = "testcontainers")]
pub use mongo::{MongoContainer, mongodb_container};

use docfixture_db::config::DEFAULT_URL;
use docfixture_db::{ConnectionHandle, ConnectionManager, Database, Result};
use rstest::*;

use crate::logging::init_test_logging;
use crate::memory::MemoryServer;

/// A memory server and a manager connected to it
pub struct MemoryHarness {
	pub server: MemoryServer,
	pub manager: ConnectionManager,
}

impl MemoryHarness {
	pub fn new(server: MemoryServer) -> Self {
		let manager = ConnectionManager::new(server.connector());
		Self { server, manager }
	}

	/// Handle for the default address
	pub async fn handle(&self) -> Result<ConnectionHandle> {
		self.manager.obtain(DEFAULT_URL, None).await
	}

	/// Database behind the default address
	pub async fn database(&self) -> Result<Database> {
		Ok(self.handle().await?.database())
	}
}

impl Default for MemoryHarness {
	fn default() -> Self {
		Self::new(MemoryServer::new())
	}
}

/// Fresh in-memory server
#[fixture]
pub fn memory_server() -> MemoryServer {
	init_test_logging();
	MemoryServer::new()
}

/// Fresh in-memory server with a manager in front of it
///
/// ```rust
/// use docfixture_test::fixtures::memory_harness;
///
/// # #[tokio::main]
/// # async fn main() {
/// let harness = memory_harness();
/// let db = harness.database().await.unwrap();
/// assert_eq!(db.name(), "test");
/// # }
/// ```
#[fixture]
pub fn memory_harness() -> MemoryHarness {
	init_test_logging();
	MemoryHarness::default()
}
