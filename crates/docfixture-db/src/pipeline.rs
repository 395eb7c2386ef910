//! Aggregation pipelines
//!
//! A [`Pipeline`] is an ordered list of stages handed to the database
//! untouched. The stage contents are the engine's business.

use bson::{Document, doc};

/// Collection holding members
pub const MEMBER_COLLECTION: &str = "member";

/// Collection holding subscriptions; each references a member by `member.reference`
pub const SUBSCRIPTION_COLLECTION: &str = "subscription";

/// Ordered aggregation stages
///
/// # Examples
///
/// ```
/// use bson::doc;
/// use docfixture_db::pipeline::Pipeline;
///
/// let pipeline = Pipeline::new()
///     .stage(doc! { "$match": { "active": true } })
///     .stage(doc! { "$project": { "_id": 1 } });
///
/// assert_eq!(pipeline.len(), 2);
/// assert!(pipeline.stages()[0].contains_key("$match"));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
	stages: Vec<Document>,
}

impl Pipeline {
	pub fn new() -> Self {
		Self::default()
	}

	/// Append a stage
	pub fn stage(mut self, stage: Document) -> Self {
		self.stages.push(stage);
		self
	}

	pub fn push(&mut self, stage: Document) {
		self.stages.push(stage);
	}

	pub fn stages(&self) -> &[Document] {
		&self.stages
	}

	pub fn into_stages(self) -> Vec<Document> {
		self.stages
	}

	pub fn len(&self) -> usize {
		self.stages.len()
	}

	pub fn is_empty(&self) -> bool {
		self.stages.is_empty()
	}
}

impl From<Vec<Document>> for Pipeline {
	fn from(stages: Vec<Document>) -> Self {
		Self { stages }
	}
}

impl<const N: usize> From<[Document; N]> for Pipeline {
	fn from(stages: [Document; N]) -> Self {
		Self {
			stages: stages.into(),
		}
	}
}

impl From<&Pipeline> for Pipeline {
	fn from(pipeline: &Pipeline) -> Self {
		pipeline.clone()
	}
}

impl IntoIterator for Pipeline {
	type Item = Document;
	type IntoIter = std::vec::IntoIter<Document>;

	fn into_iter(self) -> Self::IntoIter {
		self.stages.into_iter()
	}
}

/// Active members that hold at least one active subscription.
///
/// Runs against [`MEMBER_COLLECTION`], joins [`SUBSCRIPTION_COLLECTION`] on
/// `member.reference` and returns only each member's `_id`.
pub fn active_subscribers() -> Pipeline {
	Pipeline::new()
		.stage(doc! { "$match": { "active": true } })
		.stage(doc! {
			"$lookup": {
				"from": SUBSCRIPTION_COLLECTION,
				"localField": "_id",
				"foreignField": "member.reference",
				"as": "subscriptions",
			}
		})
		.stage(doc! { "$match": { "subscriptions.active": true } })
		.stage(doc! { "$project": { "_id": 1 } })
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	fn test_stages_keep_insertion_order() {
		let mut pipeline = Pipeline::from(vec![doc! { "$match": { "a": 1 } }]);
		pipeline.push(doc! { "$limit": 5 });

		let names: Vec<String> = pipeline
			.into_iter()
			.filter_map(|stage| stage.keys().next().cloned())
			.collect();

		assert_eq!(names, vec!["$match", "$limit"]);
	}

	#[rstest]
	fn test_active_subscribers_shape() {
		let pipeline = active_subscribers();

		assert_eq!(pipeline.len(), 4);
		assert_eq!(pipeline.stages()[0], doc! { "$match": { "active": true } });

		let lookup = pipeline.stages()[1].get_document("$lookup").unwrap();
		assert_eq!(lookup.get_str("from").unwrap(), "subscription");
		assert_eq!(lookup.get_str("foreignField").unwrap(), "member.reference");
		assert_eq!(pipeline.stages()[3], doc! { "$project": { "_id": 1 } });
	}

	#[rstest]
	fn test_empty_pipeline() {
		let pipeline = Pipeline::new();

		assert!(pipeline.is_empty());
		assert_eq!(Pipeline::from(Vec::<Document>::new()), pipeline);
	}
}
