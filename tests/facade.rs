//! Facade Tests
//!
//! The prelude is enough to write a complete fixture test.

use docfixture::prelude::*;
use docfixture_test::memory::MemoryServer;
use rstest::*;

#[rstest]
#[tokio::test]
async fn test_prelude_covers_a_full_round_trip() {
	// Arrange
	let server = MemoryServer::new();
	let manager = ConnectionManager::new(server.connector());
	let settings = FixtureSettings::new("mongodb://localhost:27017/facade");

	// Act
	let handle = manager.obtain_with(&settings).await.unwrap();
	let db = handle.database();
	db.insert("member", doc! { "_id": "M1", "active": true })
		.await
		.unwrap();
	db.insert(
		"subscription",
		doc! { "_id": "S1", "active": true, "member": { "reference": "M1" } },
	)
	.await
	.unwrap();
	let results = db
		.run_aggregation("member", active_subscribers())
		.await
		.unwrap();
	db.drop_collections(["member", "subscription"]).await.unwrap();
	manager.close_all().await.unwrap();

	// Assert
	assert_eq!(results, vec![doc! { "_id": "M1" }]);
	assert!(server.collection_names("facade").is_empty());
	assert!(handle.is_closed());
}
