//! Backend
//!
//! Thin contract over the external consensus-backed store:
//! - Point reads of the latest committed value
//! - Unconditional, create-only and version-matched writes
//! - Per-key change subscriptions
//!
//! Conditional writes MUST be atomic on the backend side; the store never
//! emulates them with local read-then-write.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
#[cfg(test)]
use mockall::automock;

use crate::Result;
use crate::VersionedValue;

/// Change events for one key, newest last.
///
/// Dropping the stream cancels the subscription and releases backend-side
/// resources.
pub type WatchStream = Pin<Box<dyn Stream<Item = Result<VersionedValue>> + Send>>;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Latest committed value, or [`crate::Error::NotFound`]
    async fn read(
        &self,
        key: &str,
    ) -> Result<VersionedValue>;

    /// Unconditional write; returns the assigned version (1 for a new key)
    async fn put(
        &self,
        key: &str,
        payload: Bytes,
    ) -> Result<u64>;

    /// Write only if the key holds no value; returns version 1 or
    /// [`crate::Error::AlreadyExists`]
    async fn create_only(
        &self,
        key: &str,
        payload: Bytes,
    ) -> Result<u64>;

    /// Write only if the current version equals `expected_version` (an absent
    /// key has version 0); returns `expected_version + 1` or
    /// [`crate::Error::VersionMismatch`]
    async fn compare_and_set(
        &self,
        key: &str,
        expected_version: u64,
        payload: Bytes,
    ) -> Result<u64>;

    /// Opens a change subscription for `key`.
    ///
    /// The stream yields values committed after the subscription was
    /// established; it does not replay history.
    async fn subscribe(
        &self,
        key: &str,
    ) -> Result<WatchStream>;
}
