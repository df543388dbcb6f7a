//! Per-key shared watch state
//!
//! A [`Watchable`] owns the single backend subscription for a key and fans
//! every newer version out to the attached watch handles:
//!
//! ```text
//! Backend stream ──> WatchLoop (1 task per key)
//!                        │ update(value)          [version must increase]
//!                        ▼
//!                    Watchable ──┬─> handle slot + try_send(())   [coalescing]
//!                                ├─> handle slot + try_send(())
//!                                └─> handle slot + try_send(())
//! ```
//!
//! The value slot of a handle is written before its notification is sent, so
//! a consumer woken by the channel always reads a value at least as new as the
//! one that triggered the wake-up.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use super::WatchLoop;
use crate::metrics::ACTIVE_WATCHABLES;
use crate::metrics::WATCH_NOTIFICATIONS;
use crate::Backend;
use crate::StoreConfig;
use crate::VersionedValue;

static NEXT_WATCHABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Value slot shared between a Watchable and one handle
pub(crate) type ValueSlot = Arc<ArcSwapOption<VersionedValue>>;

#[derive(Debug)]
struct Watcher {
    value: ValueSlot,
    notify: mpsc::Sender<()>,
}

#[derive(Debug, Default)]
struct WatchableState {
    current: Option<Arc<VersionedValue>>,
    watchers: HashMap<u64, Watcher>,
    next_watcher_id: u64,
    closed: bool,
}

/// What a new handle receives when it attaches
#[derive(Debug)]
pub(crate) struct Attachment {
    pub(crate) watcher_id: u64,
    pub(crate) value: ValueSlot,
    pub(crate) notifications: mpsc::Receiver<()>,
}

#[derive(Debug)]
pub(crate) struct Watchable {
    id: u64,
    key: String,
    state: Mutex<WatchableState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Watchable {
    pub(crate) fn new(key: &str) -> Arc<Self> {
        ACTIVE_WATCHABLES.inc();
        Arc::new(Self {
            id: NEXT_WATCHABLE_ID.fetch_add(1, Ordering::Relaxed),
            key: key.to_string(),
            state: Mutex::new(WatchableState::default()),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    /// Spawns the update loop that owns the backend subscription.
    pub(crate) fn start(
        self: &Arc<Self>,
        backend: Arc<dyn Backend>,
        config: &StoreConfig,
    ) {
        let watch_loop = WatchLoop::new(
            Arc::clone(self),
            backend,
            config.backend_key(&self.key),
            config.watch.clone(),
            config.retry,
        );
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(watch_loop.run(cancel));

        *self.task.lock() = Some(handle);
        debug!(key = %self.key, watchable_id = self.id, "watchable started");
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    /// Latest value observed from the backend
    pub(crate) fn current(&self) -> Option<Arc<VersionedValue>> {
        self.state.lock().current.clone()
    }

    pub(crate) fn watcher_count(&self) -> usize {
        self.state.lock().watchers.len()
    }

    #[cfg(test)]
    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Adds a watcher.
    ///
    /// If a value has already been observed the new watcher starts with it
    /// and one pending notification.
    pub(crate) fn attach(&self) -> Attachment {
        let (notify, notifications) = mpsc::channel(1);
        let value: ValueSlot = Arc::new(ArcSwapOption::empty());

        let mut state = self.state.lock();
        state.next_watcher_id += 1;
        let watcher_id = state.next_watcher_id;

        if state.closed {
            // `notify` is dropped here, so the handle starts closed
            return Attachment {
                watcher_id,
                value,
                notifications,
            };
        }

        if let Some(current) = &state.current {
            value.store(Some(Arc::clone(current)));
            let _ = notify.try_send(());
        }

        state.watchers.insert(
            watcher_id,
            Watcher {
                value: Arc::clone(&value),
                notify,
            },
        );
        trace!(
            key = %self.key,
            watchable_id = self.id,
            watcher_id,
            watchers = state.watchers.len(),
            "watcher attached"
        );

        Attachment {
            watcher_id,
            value,
            notifications,
        }
    }

    /// Removes a watcher and returns how many remain.
    ///
    /// Once this returns, no update touches the detached watcher's slot.
    pub(crate) fn detach(
        &self,
        watcher_id: u64,
    ) -> usize {
        let mut state = self.state.lock();
        state.watchers.remove(&watcher_id);
        trace!(
            key = %self.key,
            watchable_id = self.id,
            watcher_id,
            watchers = state.watchers.len(),
            "watcher detached"
        );
        state.watchers.len()
    }

    /// Publishes `value` if it is newer than the current one.
    ///
    /// Never blocks: a watcher whose notification slot is already full keeps
    /// its pending signal, which now refers to the newer value.
    pub(crate) fn update(
        &self,
        value: VersionedValue,
    ) -> bool {
        let mut state = self.state.lock();
        if state.closed || !value.is_newer_than(state.current.as_deref()) {
            return false;
        }

        let value = Arc::new(value);
        let (mut sent, mut coalesced) = (0u64, 0u64);
        for (watcher_id, watcher) in state.watchers.iter() {
            watcher.value.store(Some(Arc::clone(&value)));
            match watcher.notify.try_send(()) {
                Ok(()) => sent += 1,
                Err(TrySendError::Full(())) => coalesced += 1,
                Err(TrySendError::Closed(())) => {
                    trace!(watcher_id, "watcher receiver already closed");
                }
            }
        }

        trace!(
            key = %self.key,
            watchable_id = self.id,
            version = value.version(),
            sent,
            coalesced,
            "value published"
        );
        state.current = Some(value);
        drop(state);

        WATCH_NOTIFICATIONS.with_label_values(&["sent"]).inc_by(sent);
        WATCH_NOTIFICATIONS.with_label_values(&["coalesced"]).inc_by(coalesced);
        true
    }

    /// Terminal transition: drops every watcher's sender and stops the loop.
    ///
    /// Idempotent and non-blocking; the loop releases the subscription when
    /// it observes the cancellation.
    pub(crate) fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.watchers.clear();
        }
        self.cancel.cancel();
        ACTIVE_WATCHABLES.dec();
        debug!(key = %self.key, watchable_id = self.id, "watchable closed");
    }

    /// Hands the update task to a caller that wants to await its exit.
    pub(crate) fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task.lock().take()
    }
}
