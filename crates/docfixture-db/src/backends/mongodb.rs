//! MongoDB connector and session store
//!
//! [`MongoConnector`] opens a driver [`Client`] per address and pings the
//! selected database so that unreachable servers and bad credentials fail at
//! open time; the driver itself connects lazily.
//!
//! # Example
//!
//! ```rust,no_run
//! use docfixture_db::backends::mongodb::MongoConnector;
//! use docfixture_db::connection::ConnectionManager;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConnectionManager::new(MongoConnector::new());
//! let handle = manager.obtain("mongodb://localhost:27017/test", None).await?;
//! assert_eq!(handle.database_name(), "test");
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use bson::{Document, doc};
use futures::stream::TryStreamExt;
use mongodb::options::{ClientOptions, ServerApi, ServerApiVersion};
use mongodb::{Client, Database};
use std::sync::Arc;

use crate::config::{ConnectOptions, ConnectionAddress};
use crate::error::BackendError;
use crate::store::{Connector, DocumentStore, StoreResult};

/// Opens MongoDB sessions
#[derive(Debug, Clone, Default)]
pub struct MongoConnector {
	_private: (),
}

impl MongoConnector {
	pub fn new() -> Self {
		Self::default()
	}
}

/// Copy the recognized options onto the driver's client options
pub(crate) fn apply_connect_options(client_options: &mut ClientOptions, options: &ConnectOptions) {
	if let Some(name) = &options.app_name {
		client_options.app_name = Some(name.clone());
	}
	if let Some(direct) = options.direct_connection {
		client_options.direct_connection = Some(direct);
	}
	match options.stable_api {
		Some(true) => {
			client_options.server_api = Some(ServerApi::builder().version(ServerApiVersion::V1).build());
		}
		Some(false) => client_options.server_api = None,
		None => {}
	}
	if let Some(retry) = options.retry_writes {
		client_options.retry_writes = Some(retry);
	}
	if let Some(timeout) = options.server_selection_timeout() {
		client_options.server_selection_timeout = Some(timeout);
	}
	if let Some(timeout) = options.connect_timeout() {
		client_options.connect_timeout = Some(timeout);
	}
}

#[async_trait]
impl Connector for MongoConnector {
	async fn open(
		&self,
		address: &ConnectionAddress,
		options: &ConnectOptions,
	) -> StoreResult<Arc<dyn DocumentStore>> {
		let mut client_options = ClientOptions::parse(address.as_str()).await?;
		apply_connect_options(&mut client_options, options);

		let client = Client::with_options(client_options)?;
		let database = client.database(address.database());

		database
			.run_command(doc! { "ping": 1 })
			.await
			.map_err(BackendError::from)?;

		Ok(Arc::new(MongoStore { client, database }))
	}
}

/// A MongoDB client bound to one database
#[derive(Clone)]
pub struct MongoStore {
	client: Client,
	database: Database,
}

impl MongoStore {
	/// The driver database, for operations outside the store interface
	pub fn database(&self) -> &Database {
		&self.database
	}
}

#[async_trait]
impl DocumentStore for MongoStore {
	async fn insert_one(&self, collection: &str, document: Document) -> StoreResult<()> {
		self.database
			.collection::<Document>(collection)
			.insert_one(document)
			.await?;
		Ok(())
	}

	async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> StoreResult<()> {
		self.database
			.collection::<Document>(collection)
			.insert_many(documents)
			.await?;
		Ok(())
	}

	async fn aggregate(
		&self,
		collection: &str,
		pipeline: Vec<Document>,
	) -> StoreResult<Vec<Document>> {
		let cursor = self
			.database
			.collection::<Document>(collection)
			.aggregate(pipeline)
			.await?;

		let results: Vec<Document> = cursor.try_collect().await?;
		Ok(results)
	}

	async fn drop_collection(&self, collection: &str) -> StoreResult<()> {
		self.database
			.collection::<Document>(collection)
			.drop()
			.await?;
		Ok(())
	}

	async fn close(&self) -> StoreResult<()> {
		self.client.clone().shutdown().await;
		Ok(())
	}
}
