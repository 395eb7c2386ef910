//! Running aggregation pipelines

use bson::Document;

use crate::connection::Database;
use crate::error::{FixtureError, Result};
use crate::pipeline::Pipeline;

impl Database {
	/// Run `pipeline` against `collection` and collect every result.
	///
	/// The stages are passed to the engine as given and the results come back
	/// in the engine's order.
	pub async fn run_aggregation(
		&self,
		collection: &str,
		pipeline: impl Into<Pipeline>,
	) -> Result<Vec<Document>> {
		let pipeline = pipeline.into();
		tracing::debug!(collection, stages = pipeline.len(), "Running aggregation");

		let results = self
			.store()
			.aggregate(collection, pipeline.into_stages())
			.await
			.map_err(|source| FixtureError::Aggregate {
				collection: collection.to_string(),
				source,
			})?;

		tracing::debug!(collection, results = results.len(), "Aggregation finished");
		Ok(results)
	}
}
