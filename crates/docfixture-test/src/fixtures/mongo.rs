//! MongoDB container fixture (requires Docker)

use docfixture_db::ConnectionManager;
use docfixture_db::config::ConnectOptions;
use rstest::*;
use std::time::Duration;
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

const MONGO_PORT: u16 = 27017;

/// A running MongoDB container
///
/// The container stops when this value is dropped.
pub struct MongoContainer {
	_container: ContainerAsync<GenericImage>,
	base_url: String,
	port: u16,
}

impl MongoContainer {
	/// Address of `database` on this container
	pub fn address_for(&self, database: &str) -> String {
		format!("{}/{}", self.base_url, database)
	}

	/// Mapped host port
	pub fn port(&self) -> u16 {
		self.port
	}

	/// Manager for this container
	///
	/// Uses a direct connection and a short server selection timeout so a
	/// dead container fails fast.
	pub fn manager(&self) -> ConnectionManager {
		let defaults = ConnectOptions::recommended().merged_with(
			&ConnectOptions::default()
				.with_direct_connection(true)
				.with_server_selection_timeout(Duration::from_secs(5)),
		);
		ConnectionManager::mongodb().with_default_options(defaults)
	}
}

async fn try_start_mongodb_container() -> Result<MongoContainer, Box<dyn std::error::Error>> {
	let container = GenericImage::new("mongo", "7.0")
		.with_exposed_port(MONGO_PORT.tcp())
		.with_wait_for(WaitFor::message_on_stdout("Waiting for connections"))
		.with_startup_timeout(Duration::from_secs(60))
		.start()
		.await?;

	let port = container.get_host_port_ipv4(MONGO_PORT).await?;

	Ok(MongoContainer {
		_container: container,
		base_url: format!("mongodb://127.0.0.1:{}", port),
		port,
	})
}

/// Fixture providing a MongoDB 7.0 container
///
/// Retries the start a few times, since image pulls and Docker hiccups are
/// common on CI.
#[fixture]
pub async fn mongodb_container() -> MongoContainer {
	const MAX_RETRIES: u32 = 3;
	const RETRY_DELAY_MS: u64 = 2000;

	let mut last_error = None;

	for attempt in 0..MAX_RETRIES {
		let error = match try_start_mongodb_container().await {
			Ok(container) => return container,
			Err(e) => e.to_string(),
		};

		tracing::warn!(
			attempt = attempt + 1,
			max_attempts = MAX_RETRIES,
			error = %error,
			"MongoDB container failed to start"
		);
		last_error = Some(error);

		if attempt < MAX_RETRIES - 1 {
			tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
		}
	}

	panic!(
		"Failed to start MongoDB container after {} attempts: {:?}",
		MAX_RETRIES, last_error
	);
}
