//! mockall doubles for the store boundary
//!
//! Use these when a test needs to script exact backend replies or verify
//! call counts; use [`MemoryServer`](crate::memory::MemoryServer) when it
//! needs a database that behaves like one.

use bson::Document;
use docfixture_db::config::{ConnectOptions, ConnectionAddress};
use docfixture_db::store::{Connector as ConnectorTrait, DocumentStore as StoreTrait, StoreResult};
use mockall::mock;
use rstest::*;
use std::sync::Arc;

// ============================================================================
// mockall-based store mocks
// ============================================================================

mock! {
	/// Mock implementation of [`Connector`](docfixture_db::store::Connector)
	///
	/// # Example
	///
	/// ```rust
	/// use docfixture_db::error::BackendError;
	/// use docfixture_db::ConnectionManager;
	/// use docfixture_test::mock::MockConnector;
	///
	/// #[tokio::main]
	/// async fn main() {
	///     let mut connector = MockConnector::new();
	///     connector
	///         .expect_open()
	///         .times(1)
	///         .returning(|_, _| Err(BackendError::connection("connection refused")));
	///
	///     let manager = ConnectionManager::new(connector);
	///     let result = manager.obtain("mongodb://localhost:1/test", None).await;
	///
	///     assert!(result.is_err());
	/// }
	/// ```
	pub Connector {}

	#[async_trait::async_trait]
	impl ConnectorTrait for Connector {
		async fn open(
			&self,
			address: &ConnectionAddress,
			options: &ConnectOptions,
		) -> StoreResult<Arc<dyn StoreTrait>>;
	}
}

mock! {
	/// Mock implementation of [`DocumentStore`](docfixture_db::store::DocumentStore)
	pub DocumentStore {}

	#[async_trait::async_trait]
	impl StoreTrait for DocumentStore {
		async fn insert_one(&self, collection: &str, document: Document) -> StoreResult<()>;
		async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> StoreResult<()>;
		async fn aggregate(&self, collection: &str, pipeline: Vec<Document>) -> StoreResult<Vec<Document>>;
		async fn drop_collection(&self, collection: &str) -> StoreResult<()>;
		async fn close(&self) -> StoreResult<()>;
	}
}

/// A connector that opens `store` exactly once
pub fn connector_for(store: MockDocumentStore) -> MockConnector {
	let store: Arc<dyn StoreTrait> = Arc::new(store);
	let mut connector = MockConnector::new();
	connector
		.expect_open()
		.times(1)
		.returning(move |_, _| Ok(store.clone()));
	connector
}

// ============================================================================
// rstest Fixtures
// ============================================================================

/// Store mock that accepts a single close
///
/// Add expectations for the operations under test before handing it to
/// [`connector_for`].
#[fixture]
pub fn mock_store() -> MockDocumentStore {
	let mut store = MockDocumentStore::new();
	store.expect_close().times(0..=1).returning(|| Ok(()));
	store
}

/// Connector mock with no expectations
#[fixture]
pub fn mock_connector() -> MockConnector {
	MockConnector::new()
}
