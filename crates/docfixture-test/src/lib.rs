//! # docfixture-test
//!
//! Test doubles and fixtures for code built on `docfixture-db`.
//!
//! ## Modules
//!
//! - [`memory`]: [`MemoryServer`], an in-process document server with an operation log
//! - [`mock`]: mockall doubles of the connector and store traits
//! - [`scenario`]: [`Scenario`], seed collections and drop them again
//! - [`fixtures`]: rstest fixtures, including a MongoDB container (requires feature)
//! - [`logging`]: one-time `tracing` setup for tests
//!
//! ## Feature Flags
//!
//! - **`testcontainers`**: MongoDB container fixture (requires Docker)

pub mod fixtures;
pub mod logging;
pub mod memory;
pub mod mock;
pub mod scenario;

#[cfg(feature = "testcontainers")]
pub use testcontainers;

pub use fixtures::{MemoryHarness, memory_harness, memory_server};
#[cfg(feature = "testcontainers")]
pub use fixtures::{MongoContainer, mongodb_container};
pub use logging::init_test_logging;
pub use memory::{MemoryConnector, MemoryServer, MemoryStore, Operation};
pub use mock::{MockConnector, MockDocumentStore, connector_for};
pub use scenario::Scenario;

/// Re-export commonly used testing types
pub mod prelude {
	pub use super::fixtures::{MemoryHarness, memory_harness, memory_server};
	#[cfg(feature = "testcontainers")]
	pub use super::fixtures::{MongoContainer, mongodb_container};
	pub use super::logging::init_test_logging;
	pub use super::memory::{MemoryServer, Operation};
	pub use super::scenario::Scenario;
}
