//! Versioned key-value store client over a consensus-backed backend.
//!
//! - Optimistic concurrency: [`Store::set_if_not_exists`] and
//!   [`Store::check_and_set`] delegate to the backend's atomic conditional
//!   writes
//! - Shared watches: any number of [`WatchHandle`]s per key share a single
//!   backend subscription and receive coalesced notifications
//! - Pluggable backends through the [`Backend`] trait; [`MemoryBackend`] is
//!   bundled for tests and single-process use

mod config;
mod errors;
pub mod metrics;
mod storage;
mod store;
mod utils;
mod value;
mod watch;

pub use crate::config::*;
pub use errors::*;
pub use storage::*;
pub use store::*;
pub use value::VersionedValue;
pub use watch::WatchHandle;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
