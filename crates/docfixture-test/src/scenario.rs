//! Seed-and-clean scopes for a single test
//!
//! A [`Scenario`] remembers every collection it seeded and drops them again
//! on [`teardown`](Scenario::teardown). Teardown is async, so unlike the
//! synchronous guards it cannot run from `Drop`; call it at the end of the
//! test.
//!
//! ```rust
//! use bson::doc;
//! use docfixture_db::ConnectionManager;
//! use docfixture_test::memory::MemoryServer;
//! use docfixture_test::scenario::Scenario;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let server = MemoryServer::new();
//! let manager = ConnectionManager::new(server.connector());
//! let handle = manager.obtain("mongodb://localhost:27017/test", None).await?;
//!
//! let mut scenario = Scenario::new(handle.database());
//! scenario.seed("member", doc! { "_id": "M1", "active": true }).await?;
//! // ... exercise the code under test ...
//! scenario.teardown().await?;
//!
//! assert!(!server.has_collection("test", "member"));
//! # Ok(())
//! # }
//! ```

use docfixture_db::{Database, Resources, Result};

/// Collections seeded by one test, dropped together at the end
#[derive(Debug)]
pub struct Scenario {
	db: Database,
	touched: Vec<String>,
}

impl Scenario {
	pub fn new(db: Database) -> Self {
		Self {
			db,
			touched: Vec::new(),
		}
	}

	/// Insert `resources` into `collection` and remember it for teardown.
	///
	/// The collection is remembered even if the insert fails, since an
	/// ordered batch may have written part of its documents.
	pub async fn seed(&mut self, collection: &str, resources: impl Into<Resources>) -> Result<()> {
		if !self.touched.iter().any(|name| name == collection) {
			self.touched.push(collection.to_string());
		}
		self.db.insert(collection, resources).await
	}

	pub fn database(&self) -> &Database {
		&self.db
	}

	/// Seeded collection names, in first-seeded order
	pub fn touched(&self) -> &[String] {
		&self.touched
	}

	/// Drop every seeded collection, in first-seeded order.
	///
	/// A collection that is already gone is skipped; any other failure stops
	/// the teardown and is returned.
	pub async fn teardown(self) -> Result<()> {
		for collection in &self.touched {
			match self.db.drop_collections([collection]).await {
				Ok(()) => {}
				Err(e) if e.is_namespace_not_found() => {
					tracing::debug!(collection = %collection, "Collection already dropped");
				}
				Err(e) => return Err(e),
			}
		}
		Ok(())
	}
}
