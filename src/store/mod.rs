//! Versioned key-value store façade
//!
//! Composes a [`Backend`] for reads and conditional writes with the shared
//! watch registry:
//! - [`Store::get`] / [`Store::set`] - plain versioned reads and writes
//! - [`Store::set_if_not_exists`] / [`Store::check_and_set`] - optimistic
//!   concurrency primitives, executed atomically by the backend
//! - [`Store::watch`] - coalescing change notifications, one backend
//!   subscription per key no matter how many handles
//!
//! # Basic Usage
//! ```ignore
//! use std::sync::Arc;
//! use watchable_kv::{MemoryBackend, Store, StoreConfig};
//!
//! let store = Store::new(Arc::new(MemoryBackend::new()), StoreConfig::default())?;
//!
//! let version = store.set("placement", &placement).await?;
//! let mut w = store.watch("placement").await?;
//!
//! // read-modify-write; retry on VersionMismatch
//! loop {
//!     let current = store.get("placement").await?;
//!     let next = rebalance(current.unmarshal()?);
//!     match store.check_and_set("placement", current.version(), &next).await {
//!         Err(e) if e.is_conditional_failure() => continue,
//!         other => break other?,
//!     };
//! }
//! ```


use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use prost::Message;
use tracing::debug;
use tracing::warn;

use crate::metrics::op_result;
use crate::metrics::register_custom_metrics;
use crate::metrics::KV_OPS;
use crate::value::marshal;
use crate::watch::WatchHandle;
use crate::watch::Watchable;
use crate::watch::WatchableRegistry;
use crate::Backend;
use crate::Error;
use crate::Result;
use crate::StoreConfig;
use crate::VersionedValue;

/// Versioned KV store with shared watches
///
/// Cheap to clone; clones share the backend, the watch registry and the
/// closed state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    backend: Arc<dyn Backend>,
    registry: Arc<WatchableRegistry>,
    config: StoreConfig,
    closed: AtomicBool,
}

impl std::fmt::Debug for Store {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("config", &self.inner.config)
            .field("watchables", &self.inner.registry.len())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Store {
    /// Creates a store over `backend`.
    ///
    /// # Errors
    /// - [`Error::Config`] if `config` fails validation
    pub fn new(
        backend: Arc<dyn Backend>,
        config: StoreConfig,
    ) -> Result<Self> {
        let config = config.validate()?;
        register_custom_metrics();

        Ok(Self {
            inner: Arc::new(StoreInner {
                backend,
                registry: Arc::new(WatchableRegistry::new()),
                config,
                closed: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    /// Reads the latest committed value.
    ///
    /// # Errors
    /// - [`Error::NotFound`] if the key has never been set
    /// - [`Error::Backend`] on backend failures
    pub async fn get(
        &self,
        key: &str,
    ) -> Result<VersionedValue> {
        self.ensure_open()?;
        let result = self.inner.backend.read(&self.backend_key(key)).await;
        self.record("get", key, &result);
        result
    }

    /// Unconditional write; returns the new version (1 for a new key).
    pub async fn set<M: Message>(
        &self,
        key: &str,
        value: &M,
    ) -> Result<u64> {
        self.ensure_open()?;
        let result = self.inner.backend.put(&self.backend_key(key), marshal(value)).await;
        self.record("set", key, &result);
        result
    }

    /// Writes only if the key holds no value; returns version 1.
    ///
    /// # Errors
    /// - [`Error::AlreadyExists`] if the key is set; nothing is written
    pub async fn set_if_not_exists<M: Message>(
        &self,
        key: &str,
        value: &M,
    ) -> Result<u64> {
        self.ensure_open()?;
        let result = self
            .inner
            .backend
            .create_only(&self.backend_key(key), marshal(value))
            .await;
        self.record("set_if_not_exists", key, &result);
        result
    }

    /// Writes only if the key's current version equals `expected_version`;
    /// returns `expected_version + 1`.
    ///
    /// An absent key has version 0. No retry is attempted on the caller's
    /// behalf.
    ///
    /// # Errors
    /// - [`Error::VersionMismatch`] if another writer got there first or the
    ///   key does not exist; nothing is written
    pub async fn check_and_set<M: Message>(
        &self,
        key: &str,
        expected_version: u64,
        value: &M,
    ) -> Result<u64> {
        self.ensure_open()?;
        let result = self
            .inner
            .backend
            .compare_and_set(&self.backend_key(key), expected_version, marshal(value))
            .await;
        self.record("check_and_set", key, &result);
        result
    }

    /// Returns a handle tracking `key`.
    ///
    /// Never waits for an initial value: a handle on a Watchable that has not
    /// observed one yet starts with `current() == None` and is notified once
    /// the first value arrives.
    ///
    /// # Errors
    /// - [`Error::StoreClosed`] after [`Store::close`]
    pub async fn watch(
        &self,
        key: &str,
    ) -> Result<WatchHandle> {
        self.ensure_open()?;

        let (watchable, attachment) = self.inner.registry.get_or_create(key, || {
            let watchable = Watchable::new(key);
            watchable.start(Arc::clone(&self.inner.backend), &self.inner.config);
            watchable
        })?;

        debug!(
            key,
            watchable_id = watchable.id(),
            watcher_id = attachment.watcher_id,
            "watch registered"
        );
        KV_OPS.with_label_values(&["watch", "ok"]).inc();

        Ok(WatchHandle::new(
            key,
            watchable,
            Arc::clone(&self.inner.registry),
            attachment,
        ))
    }

    /// Latest value already observed by the shared watch on `key`, without a
    /// backend round-trip. `None` if nobody watches the key or nothing has
    /// been observed yet.
    pub fn cached(
        &self,
        key: &str,
    ) -> Option<VersionedValue> {
        self.inner
            .registry
            .get(key)
            .and_then(|w| w.current())
            .map(|v| v.as_ref().clone())
    }

    /// Number of keys with a live shared subscription
    pub fn watchable_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Number of open handles on `key`
    pub fn watcher_count(
        &self,
        key: &str,
    ) -> usize {
        self.inner
            .registry
            .get(key)
            .map(|w| w.watcher_count())
            .unwrap_or(0)
    }

    /// Tears down every Watchable and waits for their update tasks to exit.
    ///
    /// Open handles observe their channel closing. Idempotent; never fails.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let watchables = self.inner.registry.shutdown();
        for watchable in &watchables {
            watchable.shutdown();
        }
        for watchable in watchables {
            if let Some(task) = watchable.take_task() {
                if let Err(e) = task.await {
                    warn!(
                        key = %watchable.key(),
                        "watch loop exited abnormally: {:?}",
                        e
                    );
                }
            }
        }
        debug!("store closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::StoreClosed);
        }
        Ok(())
    }

    fn backend_key(
        &self,
        key: &str,
    ) -> String {
        self.inner.config.backend_key(key)
    }

    fn record<T>(
        &self,
        op: &'static str,
        key: &str,
        result: &Result<T>,
    ) {
        let outcome = op_result(result);
        KV_OPS.with_label_values(&[op, outcome]).inc();
        if let Err(e) = result {
            // Conditional failures are expected outcomes, not incidents
            debug!(op, key, outcome, "store operation failed: {}", e);
        }
    }
}
