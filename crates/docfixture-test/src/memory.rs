//! In-memory document server
//!
//! [`MemoryServer`] stands in for a document database in tests that should
//! not need Docker. Sessions opened through its [`MemoryConnector`] share the
//! server's collections, so data inserted through one handle is visible to
//! every other handle on the same database, just like a real server.
//!
//! The server keeps an operation log, counts sessions, and can be told to
//! misbehave: refuse connections, fail specific drops, or report missing
//! collections on drop.
//!
//! # Examples
//!
//! ```
//! use bson::doc;
//! use docfixture_db::ConnectionManager;
//! use docfixture_test::memory::MemoryServer;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MemoryServer::new();
//! let manager = ConnectionManager::new(server.connector());
//!
//! let handle = manager.obtain("mongodb://localhost:27017/blog", None).await?;
//! handle.database().insert("member", doc! { "_id": "M1" }).await?;
//!
//! assert_eq!(server.documents("blog", "member"), vec![doc! { "_id": "M1" }]);
//! # Ok(())
//! # }
//! ```

mod aggregate;

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use docfixture_db::config::{ConnectOptions, ConnectionAddress};
use docfixture_db::error::BackendError;
use docfixture_db::store::{Connector, DocumentStore, StoreResult};

use aggregate::values_equal;

/// One request observed by a [`MemoryServer`]
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
	Open {
		address: String,
		options: ConnectOptions,
	},
	InsertOne {
		database: String,
		collection: String,
	},
	InsertMany {
		database: String,
		collection: String,
		count: usize,
	},
	Aggregate {
		database: String,
		collection: String,
		pipeline: Vec<Document>,
	},
	DropCollection {
		database: String,
		collection: String,
	},
	Close {
		database: String,
	},
}

type Collections = HashMap<String, Vec<Document>>;

#[derive(Default)]
struct ServerState {
	databases: HashMap<String, Collections>,
	operations: Vec<Operation>,
	opened: usize,
	closed: usize,
	refused_connections: usize,
	failing_drops: HashSet<String>,
	strict_drops: bool,
}

/// Shared in-memory database server
#[derive(Clone, Default)]
pub struct MemoryServer {
	state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
	pub fn new() -> Self {
		Self::default()
	}

	/// Report `NamespaceNotFound` when dropping a collection that does not exist
	///
	/// Off by default, matching servers from 7.0 on which accept such drops.
	pub fn with_strict_drops(self, strict: bool) -> Self {
		self.state.lock().strict_drops = strict;
		self
	}

	/// Connector opening sessions on this server
	pub fn connector(&self) -> MemoryConnector {
		MemoryConnector {
			server: self.clone(),
			open_delay: None,
		}
	}

	/// Refuse the next `count` connection attempts
	pub fn refuse_connections(&self, count: usize) {
		self.state.lock().refused_connections = count;
	}

	/// Make every drop of `collection` fail
	pub fn fail_drop(&self, collection: impl Into<String>) {
		self.state.lock().failing_drops.insert(collection.into());
	}

	/// Number of sessions opened so far
	pub fn opened_sessions(&self) -> usize {
		self.state.lock().opened
	}

	/// Number of sessions closed so far
	pub fn closed_sessions(&self) -> usize {
		self.state.lock().closed
	}

	/// Every request seen so far, in arrival order
	pub fn operations(&self) -> Vec<Operation> {
		self.state.lock().operations.clone()
	}

	/// Collections dropped so far, in order
	pub fn dropped_collections(&self) -> Vec<String> {
		self.state
			.lock()
			.operations
			.iter()
			.filter_map(|op| match op {
				Operation::DropCollection { collection, .. } => Some(collection.clone()),
				_ => None,
			})
			.collect()
	}

	/// Stored documents of a collection, in insertion order
	pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
		self.state
			.lock()
			.databases
			.get(database)
			.and_then(|collections| collections.get(collection))
			.cloned()
			.unwrap_or_default()
	}

	/// Whether the collection exists
	pub fn has_collection(&self, database: &str, collection: &str) -> bool {
		self.state
			.lock()
			.databases
			.get(database)
			.is_some_and(|collections| collections.contains_key(collection))
	}

	/// Existing collection names of a database, sorted
	pub fn collection_names(&self, database: &str) -> Vec<String> {
		let state = self.state.lock();
		let mut names: Vec<String> = state
			.databases
			.get(database)
			.map(|collections| collections.keys().cloned().collect())
			.unwrap_or_default();
		names.sort();
		names
	}
}

/// Opens sessions on a [`MemoryServer`]
#[derive(Clone)]
pub struct MemoryConnector {
	server: MemoryServer,
	open_delay: Option<Duration>,
}

impl MemoryConnector {
	/// Simulate a slow handshake, to widen race windows in concurrency tests
	pub fn with_open_delay(mut self, delay: Duration) -> Self {
		self.open_delay = Some(delay);
		self
	}

	pub fn server(&self) -> &MemoryServer {
		&self.server
	}
}

#[async_trait]
impl Connector for MemoryConnector {
	async fn open(
		&self,
		address: &ConnectionAddress,
		options: &ConnectOptions,
	) -> StoreResult<Arc<dyn DocumentStore>> {
		if let Some(delay) = self.open_delay {
			tokio::time::sleep(delay).await;
		}

		let mut state = self.server.state.lock();
		state.operations.push(Operation::Open {
			address: address.as_str().to_string(),
			options: options.clone(),
		});

		if state.refused_connections > 0 {
			state.refused_connections -= 1;
			return Err(BackendError::connection(format!(
				"Server selection timeout: No available servers for {}",
				address.masked()
			)));
		}

		state.opened += 1;
		Ok(Arc::new(MemoryStore {
			server: self.server.clone(),
			database: address.database().to_string(),
			closed: AtomicBool::new(false),
		}))
	}
}

/// A session on a [`MemoryServer`] bound to one database
pub struct MemoryStore {
	server: MemoryServer,
	database: String,
	closed: AtomicBool,
}

impl MemoryStore {
	fn ensure_open(&self) -> StoreResult<()> {
		if self.closed.load(Ordering::Acquire) {
			return Err(BackendError::connection("Client is closed"));
		}
		Ok(())
	}
}

fn duplicate_key(database: &str, collection: &str, id: &Bson) -> BackendError {
	BackendError::duplicate_key(format!(
		"E11000 duplicate key error collection: {}.{} index: _id_ dup key: {{ _id: {} }}",
		database, collection, id
	))
}

/// Give the document an `_id` if it lacks one and reject duplicates.
fn insert_checked(
	database: &str,
	collection: &str,
	documents: &mut Vec<Document>,
	mut document: Document,
) -> StoreResult<()> {
	if !document.contains_key("_id") {
		let mut with_id = Document::new();
		with_id.insert("_id", ObjectId::new());
		for (key, value) in document {
			with_id.insert(key, value);
		}
		document = with_id;
	}

	if let Some(id) = document.get("_id")
		&& documents
			.iter()
			.any(|existing| existing.get("_id").is_some_and(|other| values_equal(other, id)))
	{
		return Err(duplicate_key(database, collection, id));
	}

	documents.push(document);
	Ok(())
}

#[async_trait]
impl DocumentStore for MemoryStore {
	async fn insert_one(&self, collection: &str, document: Document) -> StoreResult<()> {
		self.ensure_open()?;

		let mut state = self.server.state.lock();
		state.operations.push(Operation::InsertOne {
			database: self.database.clone(),
			collection: collection.to_string(),
		});

		let documents = state
			.databases
			.entry(self.database.clone())
			.or_default()
			.entry(collection.to_string())
			.or_default();
		insert_checked(&self.database, collection, documents, document)
	}

	async fn insert_many(&self, collection: &str, documents: Vec<Document>) -> StoreResult<()> {
		self.ensure_open()?;
		if documents.is_empty() {
			return Err(BackendError::invalid_argument("No documents provided to insert_many"));
		}

		let mut state = self.server.state.lock();
		state.operations.push(Operation::InsertMany {
			database: self.database.clone(),
			collection: collection.to_string(),
			count: documents.len(),
		});

		let stored = state
			.databases
			.entry(self.database.clone())
			.or_default()
			.entry(collection.to_string())
			.or_default();

		// Ordered insert: documents before the first failure stay written.
		for document in documents {
			insert_checked(&self.database, collection, stored, document)?;
		}
		Ok(())
	}

	async fn aggregate(
		&self,
		collection: &str,
		pipeline: Vec<Document>,
	) -> StoreResult<Vec<Document>> {
		self.ensure_open()?;

		let mut state = self.server.state.lock();
		state.operations.push(Operation::Aggregate {
			database: self.database.clone(),
			collection: collection.to_string(),
			pipeline: pipeline.clone(),
		});

		let empty = Collections::new();
		let collections = state.databases.get(&self.database).unwrap_or(&empty);
		aggregate::run(collections, collection, &pipeline)
	}

	async fn drop_collection(&self, collection: &str) -> StoreResult<()> {
		self.ensure_open()?;

		let mut state = self.server.state.lock();
		state.operations.push(Operation::DropCollection {
			database: self.database.clone(),
			collection: collection.to_string(),
		});

		if state.failing_drops.contains(collection) {
			return Err(BackendError::execution(format!(
				"Injected failure dropping {}.{}",
				self.database, collection
			)));
		}

		let strict = state.strict_drops;
		let removed = state
			.databases
			.get_mut(&self.database)
			.and_then(|collections| collections.remove(collection));

		match removed {
			Some(_) => Ok(()),
			None if strict => Err(BackendError::namespace_not_found(format!(
				"ns not found: {}.{}",
				self.database, collection
			))),
			None => Ok(()),
		}
	}

	async fn close(&self) -> StoreResult<()> {
		if self.closed.swap(true, Ordering::AcqRel) {
			return Err(BackendError::connection("Client is already closed"));
		}

		let mut state = self.server.state.lock();
		state.operations.push(Operation::Close {
			database: self.database.clone(),
		});
		state.closed += 1;
		Ok(())
	}
}
