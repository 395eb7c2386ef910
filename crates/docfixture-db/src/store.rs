//! Boundary to the document database
//!
//! The core never talks to a driver directly. A [`Connector`] opens sessions
//! and each session is a [`DocumentStore`] bound to one logical database.
//! The MongoDB driver implements both in [`backends::mongodb`](crate::backends);
//! test doubles live in `docfixture-test`.

use async_trait::async_trait;
use bson::Document;
use std::sync::Arc;

use crate::config::{ConnectOptions, ConnectionAddress};
use crate::error::BackendError;

/// Result type for store-level calls
pub type StoreResult<T> = std::result::Result<T, BackendError>;

/// Opens sessions against a document database
#[async_trait]
pub trait Connector: Send + Sync {
	/// Open a session to `address` and select the database it names.
	///
	/// Implementations must surface unreachable endpoints and rejected
	/// credentials here rather than on the first operation.
	async fn open(
		&self,
		address: &ConnectionAddress,
		options: &ConnectOptions,
	) -> StoreResult<Arc<dyn DocumentStore>>;
}

/// An open session with a selected database
///
/// Every call is a single round trip that has completed by the time the
/// returned future resolves.
#[async_trait]
pub trait DocumentStore: Send + Sync {
	/// Insert one document
	async fn insert_one(&self, collection: &str, document: Document) -> StoreResult<()>;

	/// Insert an ordered batch of documents in one request
	async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> StoreResult<()>;

	/// Run an aggregation pipeline and collect every result document
	async fn aggregate(&self, collection: &str, pipeline: Vec<Document>)
	-> StoreResult<Vec<Document>>;

	/// Remove a collection and all of its documents
	async fn drop_collection(&self, collection: &str) -> StoreResult<()>;

	/// Release the session
	async fn close(&self) -> StoreResult<()>;
}
