//! Seeding and wiping collections
//!
//! [`Database::insert`] writes seed documents and returns only once the
//! write is acknowledged, so a query issued afterwards on the same handle
//! sees them. [`Database::drop_collections`] removes whole collections one
//! after another and stops at the first failure.

use bson::Document;

use crate::connection::Database;
use crate::error::{FixtureError, Result};

/// Seed data for [`Database::insert`]: one document or an ordered batch
#[derive(Debug, Clone, PartialEq)]
pub enum Resources {
	One(Document),
	Many(Vec<Document>),
}

impl Resources {
	/// Number of documents
	pub fn len(&self) -> usize {
		match self {
			Resources::One(_) => 1,
			Resources::Many(documents) => documents.len(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl From<Document> for Resources {
	fn from(document: Document) -> Self {
		Resources::One(document)
	}
}

impl From<Vec<Document>> for Resources {
	fn from(documents: Vec<Document>) -> Self {
		Resources::Many(documents)
	}
}

impl<const N: usize> From<[Document; N]> for Resources {
	fn from(documents: [Document; N]) -> Self {
		Resources::Many(documents.into())
	}
}

impl Database {
	/// Insert seed documents into `collection`.
	///
	/// A batch goes out as a single `insert_many`; one document as an
	/// `insert_one`. An empty batch does nothing.
	pub async fn insert(&self, collection: &str, resources: impl Into<Resources>) -> Result<()> {
		let resources = resources.into();
		let wrap = |source| FixtureError::Insert {
			collection: collection.to_string(),
			source,
		};

		match resources {
			Resources::One(document) => {
				tracing::debug!(collection, "Inserting seed document");
				self.store()
					.insert_one(collection, document)
					.await
					.map_err(wrap)
			}
			Resources::Many(documents) if documents.is_empty() => {
				tracing::debug!(collection, "Skipping empty seed batch");
				Ok(())
			}
			Resources::Many(documents) => {
				tracing::debug!(collection, count = documents.len(), "Inserting seed batch");
				self.store()
					.insert_many(collection, documents)
					.await
					.map_err(wrap)
			}
		}
	}

	/// Drop each named collection, in order.
	///
	/// Each drop finishes before the next begins. The first failure is
	/// returned and the remaining collections are left untouched. A missing
	/// collection is reported however the backend reports it; check
	/// [`FixtureError::is_namespace_not_found`] to ignore it.
	pub async fn drop_collections<I, S>(&self, collections: I) -> Result<()>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		for collection in collections {
			let collection = collection.as_ref();
			tracing::debug!(collection, "Dropping collection");

			self.store()
				.drop_collection(collection)
				.await
				.map_err(|source| FixtureError::Drop {
					collection: collection.to_string(),
					source,
				})?;
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use bson::doc;
	use rstest::rstest;

	#[rstest]
	fn test_single_document_conversion() {
		let resources = Resources::from(doc! { "_id": "M1" });

		assert_eq!(resources, Resources::One(doc! { "_id": "M1" }));
		assert_eq!(resources.len(), 1);
	}

	#[rstest]
	fn test_batch_conversion_keeps_order() {
		let resources = Resources::from([doc! { "_id": "A" }, doc! { "_id": "B" }]);

		match resources {
			Resources::Many(documents) => {
				let ids: Vec<&str> = documents.iter().map(|d| d.get_str("_id").unwrap()).collect();
				assert_eq!(ids, vec!["A", "B"]);
			}
			Resources::One(_) => panic!("expected a batch"),
		}
	}

	#[rstest]
	fn test_empty_batch() {
		let resources = Resources::from(Vec::<Document>::new());

		assert!(resources.is_empty());
	}
}
