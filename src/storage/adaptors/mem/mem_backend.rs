use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use crate::Backend;
use crate::BackendError;
use crate::Error;
use crate::Result;
use crate::VersionedValue;
use crate::WatchStream;

const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// In-process [`Backend`] with linearizable per-key versions.
///
/// Every write takes the data lock, bumps the key's version and publishes
/// the new value to the key's subscribers before releasing it, so
/// subscribers observe versions in commit order.
#[derive(Debug)]
pub struct MemoryBackend {
    // key -> (payload, version)
    data: RwLock<HashMap<String, (Bytes, u64)>>,

    subscribers: Mutex<HashMap<String, broadcast::Sender<VersionedValue>>>,

    channel_capacity: usize,

    available: AtomicBool,

    // Cancelled on outage to terminate every open subscription
    outage: Mutex<CancellationToken>,

    subscribe_calls: AtomicU64,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribers that fall more than `capacity` events behind observe
    /// [`BackendError::SubscriptionLagged`].
    pub fn with_channel_capacity(capacity: usize) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            channel_capacity: capacity.max(1),
            available: AtomicBool::new(true),
            outage: Mutex::new(CancellationToken::new()),
            subscribe_calls: AtomicU64::new(0),
        }
    }

    /// Simulates losing or regaining the backend.
    ///
    /// While unavailable every call fails with [`BackendError::Unavailable`];
    /// going unavailable also ends all open subscriptions.
    pub fn set_available(
        &self,
        available: bool,
    ) {
        let was = self.available.swap(available, Ordering::SeqCst);
        if was && !available {
            let mut outage = self.outage.lock();
            outage.cancel();
            *outage = CancellationToken::new();
            debug!("memory backend went unavailable");
        } else if !was && available {
            debug!("memory backend recovered");
        }
    }

    /// Number of live subscriptions on `key`
    ///
    /// Drops the key's channel once its last subscription is gone.
    pub fn subscriber_count(
        &self,
        key: &str,
    ) -> usize {
        let mut subscribers = self.subscribers.lock();
        let count = subscribers.get(key).map(|tx| tx.receiver_count()).unwrap_or(0);
        if count == 0 {
            subscribers.remove(key);
        }
        count
    }

    /// Number of keys holding a subscription channel
    pub fn channel_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Total number of `subscribe` calls that reached the backend
    pub fn subscribe_calls(&self) -> u64 {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    fn ensure_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("memory backend is offline".into()).into())
        }
    }

    /// Applies a write if `precondition` accepts the key's current version.
    fn write<F>(
        &self,
        key: &str,
        payload: Bytes,
        precondition: F,
    ) -> Result<u64>
    where
        F: FnOnce(Option<u64>) -> Result<()>,
    {
        self.ensure_available()?;

        let mut data = self.data.write();
        let current = data.get(key).map(|(_, version)| *version);
        precondition(current)?;

        let version = current.unwrap_or(0) + 1;
        data.insert(key.to_string(), (payload.clone(), version));
        trace!(key, version, "memory backend committed write");

        let mut subscribers = self.subscribers.lock();
        if let Some(tx) = subscribers.get(key) {
            if tx.receiver_count() == 0 {
                subscribers.remove(key);
            } else {
                // Receivers dropping concurrently is not an error
                let _ = tx.send(VersionedValue::new(payload, version));
            }
        }

        Ok(version)
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn read(
        &self,
        key: &str,
    ) -> Result<VersionedValue> {
        self.ensure_available()?;

        let data = self.data.read();
        data.get(key)
            .map(|(payload, version)| VersionedValue::new(payload.clone(), *version))
            .ok_or(Error::NotFound)
    }

    async fn put(
        &self,
        key: &str,
        payload: Bytes,
    ) -> Result<u64> {
        self.write(key, payload, |_| Ok(()))
    }

    async fn create_only(
        &self,
        key: &str,
        payload: Bytes,
    ) -> Result<u64> {
        self.write(key, payload, |current| match current {
            None => Ok(()),
            Some(_) => Err(Error::AlreadyExists),
        })
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: u64,
        payload: Bytes,
    ) -> Result<u64> {
        self.write(key, payload, |current| {
            if current.unwrap_or(0) == expected_version {
                Ok(())
            } else {
                Err(Error::VersionMismatch)
            }
        })
    }

    async fn subscribe(
        &self,
        key: &str,
    ) -> Result<WatchStream> {
        // Token first: an outage racing this call still cancels the stream
        let outage = self.outage.lock().clone();
        self.ensure_available()?;
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);

        let rx = {
            let mut subscribers = self.subscribers.lock();
            subscribers
                .entry(key.to_string())
                .or_insert_with(|| broadcast::channel(self.channel_capacity).0)
                .subscribe()
        };

        let stream = BroadcastStream::new(rx)
            .map(|event| match event {
                Ok(value) => Ok(value),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    Err(BackendError::SubscriptionLagged { skipped }.into())
                }
            })
            .take_until(outage.cancelled_owned());

        Ok(Box::pin(stream))
    }
}
