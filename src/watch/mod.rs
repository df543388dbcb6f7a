//! Shared, coalescing watches over backend subscriptions
//!
//! Many in-process consumers can track the latest value of a key while the
//! store keeps exactly one backend subscription per watched key.
//!
//! # Architecture
//!
//! ```text
//! Store::watch(key)
//!   └─> WatchableRegistry::get_or_create   [shard lock: create + attach]
//!         └─> Watchable (1 per key) ──spawn──> WatchLoop
//!               │                                 │ subscribe + read (re-sync)
//!               │<──────── update(newer) ─────────│ drain stream every tick
//!               ├─> WatchHandle A  (value slot + channel of capacity 1)
//!               └─> WatchHandle B
//!
//! WatchHandle::close / drop
//!   └─> detach ─> remaining == 0 ─> remove_if_empty ─> shutdown (cancel loop)
//! ```
//!
//! # Delivery contract
//!
//! - Each handle sees non-decreasing versions.
//! - Intermediate versions may be skipped; the handle always converges to
//!   the newest version the backend has committed.
//! - Publishing never blocks: a full notification slot means the consumer
//!   already has a pending signal, which now covers the newer value.

mod registry;
mod watch_handle;
mod watch_loop;
mod watchable;

pub use watch_handle::*;

pub(crate) use registry::*;
pub(crate) use watch_loop::*;
pub(crate) use watchable::*;
