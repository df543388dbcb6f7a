use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::Attachment;
use super::Watchable;
use crate::Error;
use crate::Result;

/// Maps each watched key to its single live [`Watchable`].
///
/// The DashMap shard lock is the critical section for both creation+attach
/// and remove-if-empty, so a handle can never attach to a Watchable that is
/// concurrently being torn down.
#[derive(Debug, Default)]
pub(crate) struct WatchableRegistry {
    watchables: DashMap<String, Arc<Watchable>>,
    closed: AtomicBool,
}

impl WatchableRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Attaches a new watcher to the live Watchable for `key`, creating it
    /// with `create` if there is none.
    ///
    /// Concurrent calls for the same key serialize on the shard lock, so
    /// exactly one Watchable (and one backend subscription) is created.
    pub(crate) fn get_or_create<F>(
        &self,
        key: &str,
        create: F,
    ) -> Result<(Arc<Watchable>, Attachment)>
    where
        F: FnOnce() -> Arc<Watchable>,
    {
        let entry = self.watchables.entry(key.to_string());
        // Checked under the shard lock; see `shutdown`
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::StoreClosed);
        }

        let watchable = entry.or_insert_with(create);
        let attachment = watchable.attach();
        Ok((Arc::clone(watchable.value()), attachment))
    }

    /// Removes `watchable` only if it is still the instance registered for
    /// `key` and has no watchers left.
    ///
    /// Returns true if the caller now owns the teardown.
    pub(crate) fn remove_if_empty(
        &self,
        key: &str,
        watchable: &Arc<Watchable>,
    ) -> bool {
        self.watchables
            .remove_if(key, |_, current| {
                Arc::ptr_eq(current, watchable) && current.watcher_count() == 0
            })
            .is_some()
    }

    pub(crate) fn get(
        &self,
        key: &str,
    ) -> Option<Arc<Watchable>> {
        self.watchables.get(key).map(|w| Arc::clone(w.value()))
    }

    pub(crate) fn len(&self) -> usize {
        self.watchables.len()
    }

    /// Rejects further creation and hands back every registered Watchable.
    ///
    /// The flag is raised before any shard is drained, so a creation racing
    /// this call either lands before its shard is drained (and is returned)
    /// or observes the flag.
    pub(crate) fn shutdown(&self) -> Vec<Arc<Watchable>> {
        self.closed.store(true, Ordering::SeqCst);

        let mut drained = Vec::new();
        self.watchables.retain(|_, watchable| {
            drained.push(Arc::clone(watchable));
            false
        });
        debug!(count = drained.len(), "watchable registry drained");
        drained
    }
}
