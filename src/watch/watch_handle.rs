use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;
use tracing::trace;

use super::Attachment;
use super::ValueSlot;
use super::Watchable;
use super::WatchableRegistry;
use crate::metrics::ACTIVE_WATCH_HANDLES;
use crate::VersionedValue;

/// Cleanup state for an open handle
#[derive(Debug)]
struct WatchCleanup {
    watchable: Arc<Watchable>,
    registry: Arc<WatchableRegistry>,
}

/// Caller-owned subscription to one key.
///
/// Notifications are coalesced: the channel holds at most one pending
/// signal, and [`current`](WatchHandle::current) always returns the newest
/// value delivered to this handle regardless of how many signals were read.
///
/// Dropping the handle closes it.
///
/// # Example
///
/// ```ignore
/// let mut w = store.watch("placement").await?;
/// while w.changed().await {
///     let placement: Placement = w.current().unwrap().unmarshal()?;
///     apply(placement);
/// }
/// ```
#[derive(Debug)]
pub struct WatchHandle {
    id: u64,
    key: String,
    value: ValueSlot,
    notifications: mpsc::Receiver<()>,
    cleanup: Option<WatchCleanup>,
}

impl WatchHandle {
    pub(crate) fn new(
        key: &str,
        watchable: Arc<Watchable>,
        registry: Arc<WatchableRegistry>,
        attachment: Attachment,
    ) -> Self {
        ACTIVE_WATCH_HANDLES.inc();
        Self {
            id: attachment.watcher_id,
            key: key.to_string(),
            value: attachment.value,
            notifications: attachment.notifications,
            cleanup: Some(WatchCleanup {
                watchable,
                registry,
            }),
        }
    }

    /// Identifier of this handle within its Watchable
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Newest value delivered to this handle, `None` until the first one
    pub fn current(&self) -> Option<VersionedValue> {
        self.value.load_full().map(|v| v.as_ref().clone())
    }

    /// Single-slot notification channel.
    ///
    /// Yields `None` once the handle (or the store) is closed.
    pub fn notifications(&mut self) -> &mut mpsc::Receiver<()> {
        &mut self.notifications
    }

    /// Waits for the next change notification.
    ///
    /// Returns false once the handle or the store has been closed.
    pub async fn changed(&mut self) -> bool {
        self.notifications.recv().await.is_some()
    }

    /// Consumes a pending notification without waiting.
    pub fn try_changed(&mut self) -> bool {
        self.notifications.try_recv().is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.cleanup.is_none()
    }

    /// Detaches from the Watchable; the last handle to detach tears it down.
    ///
    /// Idempotent and never blocks. After it returns, `current()` no longer
    /// changes and no notification is pending.
    pub fn close(&mut self) {
        let Some(cleanup) = self.cleanup.take() else {
            return;
        };

        let remaining = cleanup.watchable.detach(self.id);
        self.notifications.close();
        while self.notifications.try_recv().is_ok() {}
        ACTIVE_WATCH_HANDLES.dec();

        trace!(
            key = %self.key,
            watcher_id = self.id,
            remaining,
            "watch handle closed"
        );

        if remaining == 0 && cleanup.registry.remove_if_empty(&self.key, &cleanup.watchable) {
            cleanup.watchable.shutdown();
            debug!(
                key = %self.key,
                watchable_id = cleanup.watchable.id(),
                "last watcher closed, watchable torn down"
            );
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.close();
    }
}
