//! # docfixture-db
//!
//! Helpers for writing integration tests against a document database.
//!
//! ## Overview
//!
//! - **[`ConnectionManager`]**: hands out one cached [`ConnectionHandle`] per address
//! - **[`Database::insert`] / [`Database::drop_collections`]**: seed and wipe collections
//! - **[`Database::run_aggregation`]**: run a [`Pipeline`] and collect the results
//!
//! The database is reached through the [`Connector`] and [`DocumentStore`]
//! traits. The `mongodb` feature (on by default) provides the driver-backed
//! implementation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bson::doc;
//! use docfixture_db::{ConnectionManager, FixtureSettings, pipeline};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConnectionManager::mongodb();
//! let handle = manager.obtain_with(&FixtureSettings::from_env()).await?;
//! let db = handle.database();
//!
//! db.insert("member", doc! { "_id": "M1", "active": true }).await?;
//! db.insert("subscription", doc! {
//!     "_id": "S1",
//!     "active": true,
//!     "member": { "reference": "M1" },
//! }).await?;
//!
//! let results = db.run_aggregation("member", pipeline::active_subscribers()).await?;
//! assert_eq!(results, vec![doc! { "_id": "M1" }]);
//!
//! db.drop_collections(["member", "subscription"]).await?;
//! manager.close_all().await?;
//! # Ok(())
//! # }
//! ```

pub mod backends;
pub mod config;
pub mod connection;
pub mod error;
pub mod fixture;
pub mod pipeline;
pub mod query;
pub mod store;

pub use bson::{Document, doc};
pub use config::{ConnectOptions, ConnectionAddress, FixtureSettings};
pub use connection::{ConnectionHandle, ConnectionManager, Database};
pub use error::{BackendError, BackendErrorKind, FixtureError, Result};
pub use fixture::Resources;
pub use pipeline::Pipeline;
pub use store::{Connector, DocumentStore, StoreResult};

#[cfg(feature = "mongodb")]
pub use backends::mongodb::{MongoConnector, MongoStore};
