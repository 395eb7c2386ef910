//! Connection manager and handles
//!
//! A [`ConnectionManager`] owns the cache of open sessions, keyed by address.
//! Build one at suite setup and pass it by reference to every test; each
//! address gets exactly one session for as long as the manager lives.
//!
//! # Example
//!
//! ```rust,no_run
//! use docfixture_db::connection::ConnectionManager;
//! use bson::doc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConnectionManager::mongodb();
//! let handle = manager.obtain("mongodb://localhost:27017/blog", None).await?;
//!
//! let db = handle.database();
//! db.insert("member", doc! { "_id": "M1", "active": true }).await?;
//! db.drop_collections(["member"]).await?;
//!
//! manager.close(&handle).await?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, OnceCell};

use crate::config::{ConnectOptions, ConnectionAddress, FixtureSettings};
use crate::error::{FixtureError, Result};
use crate::store::{Connector, DocumentStore};

/// Shared reference to one open session and its selected database
///
/// Clones point at the same session. Use [`ConnectionHandle::ptr_eq`] to check
/// whether two handles are the same instance.
#[derive(Clone)]
pub struct ConnectionHandle {
	inner: Arc<HandleInner>,
}

struct HandleInner {
	address: ConnectionAddress,
	store: Arc<dyn DocumentStore>,
	closed: AtomicBool,
}

impl ConnectionHandle {
	fn new(address: ConnectionAddress, store: Arc<dyn DocumentStore>) -> Self {
		Self {
			inner: Arc::new(HandleInner {
				address,
				store,
				closed: AtomicBool::new(false),
			}),
		}
	}

	/// Whether both handles refer to the same session
	pub fn ptr_eq(a: &ConnectionHandle, b: &ConnectionHandle) -> bool {
		Arc::ptr_eq(&a.inner, &b.inner)
	}

	/// The address this handle was opened for
	pub fn address(&self) -> &ConnectionAddress {
		&self.inner.address
	}

	/// Name of the selected logical database
	pub fn database_name(&self) -> &str {
		self.inner.address.database()
	}

	/// The selected database, for fixture and query operations
	pub fn database(&self) -> Database {
		Database {
			handle: self.clone(),
		}
	}

	pub fn is_closed(&self) -> bool {
		self.inner.closed.load(Ordering::Acquire)
	}

	pub(crate) fn store(&self) -> &dyn DocumentStore {
		self.inner.store.as_ref()
	}

	/// Release the session once. Later calls report [`FixtureError::HandleClosed`].
	async fn release(&self) -> Result<()> {
		if self.inner.closed.swap(true, Ordering::AcqRel) {
			return Err(FixtureError::HandleClosed {
				address: self.inner.address.masked(),
			});
		}

		tracing::info!(
			address = %self.inner.address.masked(),
			"Closing document database session"
		);

		self.inner
			.store
			.close()
			.await
			.map_err(|source| FixtureError::Close {
				address: self.inner.address.masked(),
				source,
			})
	}
}

impl fmt::Debug for ConnectionHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConnectionHandle")
			.field("address", &self.inner.address.masked())
			.field("database", &self.database_name())
			.field("closed", &self.is_closed())
			.finish()
	}
}

/// Database reference handed to fixture and query operations
///
/// Cheap to clone; keeps the underlying handle alive.
#[derive(Clone, Debug)]
pub struct Database {
	handle: ConnectionHandle,
}

impl Database {
	pub fn name(&self) -> &str {
		self.handle.database_name()
	}

	/// The handle this database was selected from
	pub fn handle(&self) -> &ConnectionHandle {
		&self.handle
	}

	pub(crate) fn store(&self) -> &dyn DocumentStore {
		self.handle.store()
	}
}

/// Memoizes one session per address
///
/// The map lock is only held to look up or insert an address's slot. The
/// open itself runs inside the slot, so a slow open blocks callers for that
/// address and nobody else.
pub struct ConnectionManager {
	connector: Arc<dyn Connector>,
	defaults: ConnectOptions,
	cache: Mutex<HashMap<String, Slot>>,
}

type Slot = Arc<OnceCell<ConnectionHandle>>;

impl ConnectionManager {
	/// Create a manager opening sessions through `connector`, with
	/// [`ConnectOptions::recommended`] as defaults.
	pub fn new(connector: impl Connector + 'static) -> Self {
		Self::from_arc(Arc::new(connector))
	}

	/// Same as [`new`](Self::new) for a connector that is already shared
	pub fn from_arc(connector: Arc<dyn Connector>) -> Self {
		Self {
			connector,
			defaults: ConnectOptions::recommended(),
			cache: Mutex::new(HashMap::new()),
		}
	}

	/// Manager backed by the MongoDB driver
	#[cfg(feature = "mongodb")]
	pub fn mongodb() -> Self {
		Self::new(crate::backends::mongodb::MongoConnector::new())
	}

	/// Replace the default options that per-call overrides are merged over
	pub fn with_default_options(mut self, defaults: ConnectOptions) -> Self {
		self.defaults = defaults;
		self
	}

	pub fn default_options(&self) -> &ConnectOptions {
		&self.defaults
	}

	/// Return the cached handle for `address`, opening a session on first use.
	///
	/// `overrides` are merged over the default options when a session is
	/// opened; they are ignored when the address is already cached. A failed
	/// open is not cached, so the next call tries again.
	pub async fn obtain(
		&self,
		address: &str,
		overrides: Option<ConnectOptions>,
	) -> Result<ConnectionHandle> {
		let (slot, parsed) = {
			let mut cache = self.cache.lock().await;
			if let Some(handle) = cache.get(address).and_then(|slot| slot.get()) {
				tracing::debug!(
					address = %handle.address().masked(),
					ignored_overrides = overrides.is_some(),
					"Reusing cached connection handle"
				);
				return Ok(handle.clone());
			}
			let parsed = ConnectionAddress::parse(address)?;
			let slot = Arc::clone(cache.entry(address.to_string()).or_default());
			(slot, parsed)
		};

		let opened = slot
			.get_or_try_init(|| self.open(parsed, overrides))
			.await
			.cloned();

		if opened.is_err() {
			self.discard_empty_slot(address, &slot).await;
		}
		opened
	}

	async fn open(
		&self,
		parsed: ConnectionAddress,
		overrides: Option<ConnectOptions>,
	) -> Result<ConnectionHandle> {
		let options = match overrides {
			Some(overrides) => self.defaults.merged_with(&overrides),
			None => self.defaults.clone(),
		};

		tracing::info!(
			address = %parsed.masked(),
			database = parsed.database(),
			"Opening document database session"
		);

		let store = self
			.connector
			.open(&parsed, &options)
			.await
			.map_err(|source| FixtureError::Connect {
				address: parsed.masked(),
				source,
			})?;

		Ok(ConnectionHandle::new(parsed, store))
	}

	/// Drop the slot left behind by a failed open, unless another caller is
	/// still waiting on it and will retry the open itself.
	async fn discard_empty_slot(&self, address: &str, slot: &Slot) {
		let mut cache = self.cache.lock().await;
		let abandoned = cache.get(address).is_some_and(|entry| {
			Arc::ptr_eq(entry, slot) && !entry.initialized() && Arc::strong_count(entry) == 2
		});
		if abandoned {
			cache.remove(address);
		}
	}

	/// [`obtain`](Self::obtain) with the address and overrides from `settings`
	pub async fn obtain_with(&self, settings: &FixtureSettings) -> Result<ConnectionHandle> {
		self.obtain(&settings.url, Some(settings.options.clone()))
			.await
	}

	/// Release the session behind `handle`.
	///
	/// Call this once, after every user of the handle is done. The handle is
	/// evicted, so a later [`obtain`](Self::obtain) opens a fresh session.
	pub async fn close(&self, handle: &ConnectionHandle) -> Result<()> {
		{
			let mut cache = self.cache.lock().await;
			let cached = cache
				.get(handle.address().as_str())
				.and_then(|slot| slot.get())
				.is_some_and(|entry| ConnectionHandle::ptr_eq(entry, handle));
			if cached {
				cache.remove(handle.address().as_str());
			}
		}

		handle.release().await
	}

	/// Close every cached session, in address order.
	///
	/// All sessions are attempted; the first failure is returned.
	pub async fn close_all(&self) -> Result<()> {
		let mut handles: Vec<(String, ConnectionHandle)> = self
			.cache
			.lock()
			.await
			.drain()
			.filter_map(|(address, slot)| slot.get().cloned().map(|handle| (address, handle)))
			.collect();
		handles.sort_by(|a, b| a.0.cmp(&b.0));

		let mut first_error = None;
		for (_, handle) in handles {
			if let Err(e) = handle.release().await {
				if first_error.is_none() {
					first_error = Some(e);
				} else {
					tracing::warn!(error = %e, "Additional failure while closing sessions");
				}
			}
		}

		match first_error {
			Some(e) => Err(e),
			None => Ok(()),
		}
	}

	/// Whether an open handle is cached for `address`
	pub async fn is_cached(&self, address: &str) -> bool {
		self.cache
			.lock()
			.await
			.get(address)
			.is_some_and(|slot| slot.initialized())
	}

	/// Number of cached handles
	pub async fn cached_count(&self) -> usize {
		self.cache
			.lock()
			.await
			.values()
			.filter(|slot| slot.initialized())
			.count()
	}
}

impl fmt::Debug for ConnectionManager {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConnectionManager")
			.field("defaults", &self.defaults)
			.finish_non_exhaustive()
	}
}
