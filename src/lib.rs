//! # docfixture
//!
//! Integration-test helpers for document databases.
//!
//! A suite builds one [`ConnectionManager`] and obtains a cached
//! [`ConnectionHandle`] per address from it. Tests seed collections with
//! [`Database::insert`], run aggregation pipelines with
//! [`Database::run_aggregation`], and clean up with
//! [`Database::drop_collections`]. When the suite is done,
//! [`ConnectionManager::close_all`] releases every session.
//!
//! ## Feature Flags
//!
//! - `mongodb` (default) - MongoDB driver backend
//! - `test-utils` - in-memory server, mocks, `Scenario` and rstest fixtures
//! - `testcontainers` - MongoDB container fixture (requires Docker)
//! - `full` - all of the above
//!
//! ## Quick Example
//!
//! ```rust,no_run
//! use docfixture::prelude::*;
//!
//! # async fn example() -> docfixture::Result<()> {
//! let manager = ConnectionManager::mongodb();
//! let handle = manager.obtain_with(&FixtureSettings::from_env()).await?;
//! let db = handle.database();
//!
//! db.insert("member", doc! { "_id": "M1", "active": true }).await?;
//! let results = db.run_aggregation("member", active_subscribers()).await?;
//! db.drop_collections(["member"]).await?;
//!
//! manager.close_all().await?;
//! # let _ = results;
//! # Ok(())
//! # }
//! ```

pub use docfixture_db::{
	BackendError, BackendErrorKind, ConnectOptions, ConnectionAddress, ConnectionHandle,
	ConnectionManager, Connector, Database, Document, DocumentStore, FixtureError,
	FixtureSettings, Pipeline, Resources, Result, StoreResult, doc,
};
pub use docfixture_db::{backends, config, connection, error, fixture, pipeline, query, store};

#[cfg(feature = "mongodb")]
pub use docfixture_db::{MongoConnector, MongoStore};

/// Test doubles and fixtures
#[cfg(feature = "test-utils")]
pub mod test {
	pub use docfixture_test::*;
}

/// Re-export commonly used types
pub mod prelude {
	pub use docfixture_db::pipeline::active_subscribers;
	pub use docfixture_db::{
		ConnectOptions, ConnectionHandle, ConnectionManager, Database, Document, FixtureError,
		FixtureSettings, Pipeline, Resources, doc,
	};

	#[cfg(feature = "test-utils")]
	pub use docfixture_test::prelude::*;
}
