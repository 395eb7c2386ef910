//! Error types for fixture, query and connection operations
//!
//! Stores report failures as [`BackendError`]. The operations in this crate
//! wrap them in [`FixtureError`] with the collection or address involved, and
//! keep the backend error as the source so nothing is lost on the way up.

use std::fmt;

/// Result type for fixture operations
pub type Result<T> = std::result::Result<T, FixtureError>;

/// MongoDB server code for a duplicate key violation
pub const DUPLICATE_KEY_CODE: i32 = 11000;

/// MongoDB server code for an unknown namespace (collection)
pub const NAMESPACE_NOT_FOUND_CODE: i32 = 26;

/// Classification of a failure reported by a document store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
	/// Endpoint unreachable, server selection failed, session closed
	Connection,
	/// Credentials rejected
	Authentication,
	/// A write collided with an existing `_id` or unique index entry
	DuplicateKey,
	/// The collection does not exist
	NamespaceNotFound,
	/// The request was malformed (bad pipeline stage, empty batch, ...)
	InvalidArgument,
	/// Any other failure while executing a request
	Execution,
}

impl fmt::Display for BackendErrorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			BackendErrorKind::Connection => "connection",
			BackendErrorKind::Authentication => "authentication",
			BackendErrorKind::DuplicateKey => "duplicate key",
			BackendErrorKind::NamespaceNotFound => "namespace not found",
			BackendErrorKind::InvalidArgument => "invalid argument",
			BackendErrorKind::Execution => "execution",
		};
		f.write_str(name)
	}
}

/// Failure reported by a [`DocumentStore`](crate::store::DocumentStore) or
/// [`Connector`](crate::store::Connector)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct BackendError {
	kind: BackendErrorKind,
	message: String,
}

impl BackendError {
	pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
		Self {
			kind,
			message: message.into(),
		}
	}

	pub fn connection(message: impl Into<String>) -> Self {
		Self::new(BackendErrorKind::Connection, message)
	}

	pub fn authentication(message: impl Into<String>) -> Self {
		Self::new(BackendErrorKind::Authentication, message)
	}

	pub fn duplicate_key(message: impl Into<String>) -> Self {
		Self::new(BackendErrorKind::DuplicateKey, message)
	}

	pub fn namespace_not_found(message: impl Into<String>) -> Self {
		Self::new(BackendErrorKind::NamespaceNotFound, message)
	}

	pub fn invalid_argument(message: impl Into<String>) -> Self {
		Self::new(BackendErrorKind::InvalidArgument, message)
	}

	pub fn execution(message: impl Into<String>) -> Self {
		Self::new(BackendErrorKind::Execution, message)
	}

	pub fn kind(&self) -> BackendErrorKind {
		self.kind
	}

	pub fn message(&self) -> &str {
		&self.message
	}
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for BackendError {
	fn from(err: mongodb::error::Error) -> Self {
		use mongodb::error::{ErrorKind, WriteFailure};

		let code = match err.kind.as_ref() {
			ErrorKind::Command(e) => Some(e.code),
			ErrorKind::Write(WriteFailure::WriteError(e)) => Some(e.code),
			ErrorKind::InsertMany(e) => e
				.write_errors
				.as_ref()
				.and_then(|errors| errors.first())
				.map(|e| e.code),
			_ => None,
		};

		let kind = match (err.kind.as_ref(), code) {
			(_, Some(DUPLICATE_KEY_CODE)) => BackendErrorKind::DuplicateKey,
			(_, Some(NAMESPACE_NOT_FOUND_CODE)) => BackendErrorKind::NamespaceNotFound,
			(ErrorKind::Authentication { .. }, _) => BackendErrorKind::Authentication,
			(ErrorKind::Io(_), _)
			| (ErrorKind::ServerSelection { .. }, _)
			| (ErrorKind::DnsResolve { .. }, _)
			| (ErrorKind::ConnectionPoolCleared { .. }, _) => BackendErrorKind::Connection,
			(ErrorKind::InvalidArgument { .. }, _) => BackendErrorKind::InvalidArgument,
			_ => BackendErrorKind::Execution,
		};

		BackendError::new(kind, err.to_string())
	}
}

/// Unified error type for connection, fixture and query operations
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
	/// The address is not a usable document database URL
	#[error("Invalid connection address `{address}`: {reason}")]
	InvalidAddress { address: String, reason: String },

	/// Opening a session failed; nothing was cached
	#[error("Failed to connect to {address}: {source}")]
	Connect {
		address: String,
		#[source]
		source: BackendError,
	},

	/// Inserting seed documents failed
	#[error("Failed to insert into `{collection}`: {source}")]
	Insert {
		collection: String,
		#[source]
		source: BackendError,
	},

	/// Dropping a collection failed; later drops in the batch were skipped
	#[error("Failed to drop `{collection}`: {source}")]
	Drop {
		collection: String,
		#[source]
		source: BackendError,
	},

	/// Pipeline execution failed
	#[error("Aggregation on `{collection}` failed: {source}")]
	Aggregate {
		collection: String,
		#[source]
		source: BackendError,
	},

	/// Releasing a session failed
	#[error("Failed to close session to {address}: {source}")]
	Close {
		address: String,
		#[source]
		source: BackendError,
	},

	/// The handle was already released
	#[error("Connection handle for {address} is already closed")]
	HandleClosed { address: String },

	/// Settings could not be read or parsed
	#[error("Configuration error: {0}")]
	Config(String),
}

impl FixtureError {
	/// The backend failure behind this error, if any
	pub fn backend(&self) -> Option<&BackendError> {
		match self {
			FixtureError::Connect { source, .. }
			| FixtureError::Insert { source, .. }
			| FixtureError::Drop { source, .. }
			| FixtureError::Aggregate { source, .. }
			| FixtureError::Close { source, .. } => Some(source),
			FixtureError::InvalidAddress { .. }
			| FixtureError::HandleClosed { .. }
			| FixtureError::Config(_) => None,
		}
	}

	/// Whether the backend reported that the collection does not exist
	///
	/// Cleanup code that wants idempotent drops checks this and carries on.
	pub fn is_namespace_not_found(&self) -> bool {
		self.backend()
			.is_some_and(|e| e.kind() == BackendErrorKind::NamespaceNotFound)
	}

	/// Whether the backend rejected a write because the key already exists
	pub fn is_duplicate_key(&self) -> bool {
		self.backend()
			.is_some_and(|e| e.kind() == BackendErrorKind::DuplicateKey)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_namespace_not_found_is_detected_on_drop() {
		// Arrange
		let err = FixtureError::Drop {
			collection: "member".to_string(),
			source: BackendError::namespace_not_found("ns not found"),
		};

		// Act & Assert
		assert!(err.is_namespace_not_found());
		assert!(!err.is_duplicate_key());
		assert_eq!(
			err.to_string(),
			"Failed to drop `member`: namespace not found error: ns not found"
		);
	}

	#[rstest]
	fn test_duplicate_key_is_detected_on_insert() {
		let err = FixtureError::Insert {
			collection: "member".to_string(),
			source: BackendError::duplicate_key("E11000 duplicate key error"),
		};

		assert!(err.is_duplicate_key());
		assert_eq!(err.backend().map(|e| e.message()), Some("E11000 duplicate key error"));
	}

	#[rstest]
	#[case(FixtureError::HandleClosed { address: "mongodb://localhost:27017/test".to_string() })]
	#[case(FixtureError::Config("bad toml".to_string()))]
	#[case(FixtureError::InvalidAddress { address: "x".to_string(), reason: "no scheme".to_string() })]
	fn test_errors_without_backend_source(#[case] err: FixtureError) {
		assert!(err.backend().is_none());
		assert!(!err.is_namespace_not_found());
	}

	#[rstest]
	fn test_source_chain_is_preserved() {
		use std::error::Error as _;

		let err = FixtureError::Aggregate {
			collection: "member".to_string(),
			source: BackendError::invalid_argument("Unrecognized pipeline stage name: '$bogus'"),
		};

		let source = err.source().map(|s| s.to_string());
		assert_eq!(
			source.as_deref(),
			Some("invalid argument error: Unrecognized pipeline stage name: '$bogus'")
		);
	}
}
