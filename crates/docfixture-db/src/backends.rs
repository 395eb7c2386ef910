//! Driver-backed implementations of the store boundary

#[cfg(feature = "mongodb")]
pub mod mongodb;

#[cfg(feature = "mongodb")]
pub use self::mongodb::{MongoConnector, MongoStore};
