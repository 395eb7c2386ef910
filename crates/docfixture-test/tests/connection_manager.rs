//! Connection Manager Tests
//!
//! Caching, failure handling and release of connection handles.

use bson::doc;
use docfixture_db::config::{ConnectOptions, FixtureSettings};
use docfixture_db::error::{BackendErrorKind, FixtureError};
use docfixture_db::{ConnectionHandle, ConnectionManager};
use docfixture_test::fixtures::{MemoryHarness, memory_harness};
use docfixture_test::memory::{MemoryServer, Operation};
use rstest::*;
use std::sync::Arc;
use std::time::Duration;

const BLOG: &str = "mongodb://localhost:27017/blog";
const SHOP: &str = "mongodb://localhost:27017/shop";

fn open_count(server: &MemoryServer) -> usize {
	server
		.operations()
		.iter()
		.filter(|op| matches!(op, Operation::Open { .. }))
		.count()
}

#[rstest]
#[tokio::test]
async fn test_repeated_obtain_returns_same_handle(memory_harness: MemoryHarness) {
	// Arrange
	let MemoryHarness { server, manager } = memory_harness;

	// Act
	let first = manager.obtain(BLOG, None).await.unwrap();
	let second = manager.obtain(BLOG, None).await.unwrap();

	// Assert
	assert!(ConnectionHandle::ptr_eq(&first, &second));
	assert_eq!(server.opened_sessions(), 1);
	assert_eq!(manager.cached_count().await, 1);
}

#[rstest]
#[tokio::test]
async fn test_distinct_addresses_get_distinct_handles(memory_harness: MemoryHarness) {
	let MemoryHarness { server, manager } = memory_harness;

	let blog = manager.obtain(BLOG, None).await.unwrap();
	let shop = manager.obtain(SHOP, None).await.unwrap();

	assert!(!ConnectionHandle::ptr_eq(&blog, &shop));
	assert_eq!(blog.database_name(), "blog");
	assert_eq!(shop.database_name(), "shop");
	assert_eq!(server.opened_sessions(), 2);
}

#[rstest]
#[tokio::test]
async fn test_database_defaults_to_test(memory_harness: MemoryHarness) {
	let handle = memory_harness
		.manager
		.obtain("mongodb://localhost:27017", None)
		.await
		.unwrap();

	assert_eq!(handle.database_name(), "test");
}

#[rstest]
#[tokio::test]
async fn test_failed_open_is_not_cached(memory_harness: MemoryHarness) {
	// Arrange
	let MemoryHarness { server, manager } = memory_harness;
	server.refuse_connections(1);

	// Act
	let failed = manager.obtain(BLOG, None).await;
	let cached_after_failure = manager.is_cached(BLOG).await;
	let retried = manager.obtain(BLOG, None).await;

	// Assert
	let err = failed.unwrap_err();
	assert!(matches!(err, FixtureError::Connect { .. }));
	assert_eq!(err.backend().map(|e| e.kind()), Some(BackendErrorKind::Connection));
	assert!(!cached_after_failure);
	assert!(retried.is_ok());
	assert_eq!(open_count(&server), 2);
	assert_eq!(server.opened_sessions(), 1);
}

#[rstest]
#[case("localhost:27017/blog")]
#[case("postgres://localhost:5432/blog")]
#[case("mongodb:///blog")]
#[case("mongodb://localhost:27017/bad.name")]
#[tokio::test]
async fn test_invalid_address_never_connects(memory_harness: MemoryHarness, #[case] address: &str) {
	let MemoryHarness { server, manager } = memory_harness;

	let result = manager.obtain(address, None).await;

	assert!(matches!(result, Err(FixtureError::InvalidAddress { .. })));
	assert!(server.operations().is_empty());
	assert_eq!(manager.cached_count().await, 0);
}

#[rstest]
#[tokio::test]
async fn test_overrides_are_merged_over_defaults(memory_harness: MemoryHarness) {
	// Arrange
	let MemoryHarness { server, manager } = memory_harness;
	let overrides = ConnectOptions::default()
		.with_direct_connection(true)
		.with_stable_api(false);

	// Act
	manager.obtain(BLOG, Some(overrides.clone())).await.unwrap();

	// Assert
	let expected = ConnectOptions::recommended().merged_with(&overrides);
	assert_eq!(
		server.operations()[0],
		Operation::Open {
			address: BLOG.to_string(),
			options: expected,
		}
	);
}

#[rstest]
#[tokio::test]
async fn test_overrides_are_ignored_on_cache_hit(memory_harness: MemoryHarness) {
	let MemoryHarness { server, manager } = memory_harness;
	let first = manager.obtain(BLOG, None).await.unwrap();

	let second = manager
		.obtain(BLOG, Some(ConnectOptions::default().with_app_name("other")))
		.await
		.unwrap();

	assert!(ConnectionHandle::ptr_eq(&first, &second));
	assert_eq!(open_count(&server), 1);
}

#[rstest]
#[tokio::test]
async fn test_obtain_with_settings(memory_harness: MemoryHarness) {
	let MemoryHarness { server, manager } = memory_harness;
	let settings = FixtureSettings::from_lookup(|name| {
		(name == "MONGO_URL").then(|| SHOP.to_string())
	});

	let handle = manager.obtain_with(&settings).await.unwrap();

	assert_eq!(handle.database_name(), "shop");
	assert!(manager.is_cached(SHOP).await);
	assert_eq!(server.opened_sessions(), 1);
}

#[rstest]
#[tokio::test]
async fn test_close_releases_exactly_once(memory_harness: MemoryHarness) {
	// Arrange
	let MemoryHarness { server, manager } = memory_harness;
	let handle = manager.obtain(BLOG, None).await.unwrap();

	// Act
	let first = manager.close(&handle).await;
	let second = manager.close(&handle).await;

	// Assert
	assert!(first.is_ok());
	assert!(matches!(second, Err(FixtureError::HandleClosed { .. })));
	assert!(handle.is_closed());
	assert_eq!(server.closed_sessions(), 1);
	assert!(!manager.is_cached(BLOG).await);
}

#[rstest]
#[tokio::test]
async fn test_obtain_after_close_opens_fresh_session(memory_harness: MemoryHarness) {
	let MemoryHarness { server, manager } = memory_harness;
	let old = manager.obtain(BLOG, None).await.unwrap();
	manager.close(&old).await.unwrap();

	let fresh = manager.obtain(BLOG, None).await.unwrap();

	assert!(!ConnectionHandle::ptr_eq(&old, &fresh));
	assert!(!fresh.is_closed());
	assert_eq!(server.opened_sessions(), 2);
}

#[rstest]
#[tokio::test]
async fn test_closed_handle_rejects_operations(memory_harness: MemoryHarness) {
	let MemoryHarness { manager, .. } = memory_harness;
	let handle = manager.obtain(BLOG, None).await.unwrap();
	let db = handle.database();
	manager.close(&handle).await.unwrap();

	let result = db.insert("member", doc! { "_id": "M1" }).await;

	let err = result.unwrap_err();
	assert!(matches!(err, FixtureError::Insert { .. }));
	assert_eq!(err.backend().map(|e| e.kind()), Some(BackendErrorKind::Connection));
}

#[rstest]
#[tokio::test]
async fn test_close_all_releases_every_session(memory_harness: MemoryHarness) {
	// Arrange
	let MemoryHarness { server, manager } = memory_harness;
	let blog = manager.obtain(BLOG, None).await.unwrap();
	let shop = manager.obtain(SHOP, None).await.unwrap();

	// Act
	let result = manager.close_all().await;

	// Assert
	assert!(result.is_ok());
	assert!(blog.is_closed());
	assert!(shop.is_closed());
	assert_eq!(server.closed_sessions(), 2);
	assert_eq!(manager.cached_count().await, 0);
	assert_eq!(
		server
			.operations()
			.into_iter()
			.filter_map(|op| match op {
				Operation::Close { database } => Some(database),
				_ => None,
			})
			.collect::<Vec<_>>(),
		vec!["blog", "shop"]
	);
}

#[rstest]
#[tokio::test]
async fn test_close_all_skips_already_closed_handles(memory_harness: MemoryHarness) {
	let MemoryHarness { server, manager } = memory_harness;
	let blog = manager.obtain(BLOG, None).await.unwrap();
	manager.close(&blog).await.unwrap();

	let result = manager.close_all().await;

	assert!(result.is_ok());
	assert_eq!(server.closed_sessions(), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_obtain_opens_once() {
	// Arrange
	let server = MemoryServer::new();
	let connector = server.connector().with_open_delay(Duration::from_millis(50));
	let manager = Arc::new(ConnectionManager::new(connector));

	// Act
	let tasks: Vec<_> = (0..8)
		.map(|_| {
			let manager = Arc::clone(&manager);
			tokio::spawn(async move { manager.obtain(BLOG, None).await })
		})
		.collect();
	let mut handles = Vec::new();
	for task in tasks {
		handles.push(task.await.unwrap().unwrap());
	}

	// Assert
	assert_eq!(server.opened_sessions(), 1);
	assert!(
		handles
			.iter()
			.all(|handle| ConnectionHandle::ptr_eq(handle, &handles[0]))
	);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cache_hit_does_not_wait_for_another_open() {
	// Arrange
	let server = MemoryServer::new();
	let connector = server.connector().with_open_delay(Duration::from_millis(500));
	let manager = Arc::new(ConnectionManager::new(connector));
	let blog = manager.obtain(BLOG, None).await.unwrap();
	let opening = {
		let manager = Arc::clone(&manager);
		tokio::spawn(async move { manager.obtain(SHOP, None).await })
	};
	tokio::time::sleep(Duration::from_millis(50)).await;

	// Act
	let started = std::time::Instant::now();
	let again = manager.obtain(BLOG, None).await.unwrap();
	let elapsed = started.elapsed();

	// Assert
	assert!(ConnectionHandle::ptr_eq(&blog, &again));
	assert!(elapsed < Duration::from_millis(200), "cache hit took {elapsed:?}");
	assert!(!manager.is_cached(SHOP).await);
	opening.await.unwrap().unwrap();
	assert!(manager.is_cached(SHOP).await);
	assert_eq!(server.opened_sessions(), 2);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiters_retry_after_a_failed_open() {
	// Arrange
	let server = MemoryServer::new();
	server.refuse_connections(1);
	let connector = server.connector().with_open_delay(Duration::from_millis(50));
	let manager = Arc::new(ConnectionManager::new(connector));

	// Act
	let tasks: Vec<_> = (0..4)
		.map(|_| {
			let manager = Arc::clone(&manager);
			tokio::spawn(async move { manager.obtain(BLOG, None).await })
		})
		.collect();
	let mut results = Vec::new();
	for task in tasks {
		results.push(task.await.unwrap());
	}

	// Assert
	let (opened, failed): (Vec<_>, Vec<_>) = results.into_iter().partition(|r| r.is_ok());
	assert_eq!(failed.len(), 1);
	assert_eq!(opened.len(), 3);
	assert_eq!(server.opened_sessions(), 1);
	assert!(manager.is_cached(BLOG).await);
	assert_eq!(manager.cached_count().await, 1);
}
