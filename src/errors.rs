//! Versioned KV Store Error Hierarchy
//!
//! Splits failures into the expected outcomes of optimistic concurrency
//! (`NotFound`, `AlreadyExists`, `VersionMismatch`) and the opaque failures
//! raised by the consensus-backed backend.

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Key has never been written
    #[error("key not found")]
    NotFound,

    /// Create-only write attempted on a key that already holds a value
    #[error("key already exists")]
    AlreadyExists,

    /// Expected version does not match the backend's current version
    #[error("version mismatch")]
    VersionMismatch,

    /// Transport or consensus-layer failures, surfaced unchanged
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Stored payload could not be decoded into the requested message
    #[error("failed to decode value: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Store configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Operation attempted after `Store::close`
    #[error("store is closed")]
    StoreClosed,
}

impl Error {
    /// Returns true for the ordinary outcomes of a conditional write.
    ///
    /// Callers looping read-modify-write should re-read and retry on these.
    pub fn is_conditional_failure(&self) -> bool {
        matches!(
            self,
            Error::NotFound | Error::AlreadyExists | Error::VersionMismatch
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Backend cannot serve requests (connectivity loss, no quorum)
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Backend round-trip exceeded its deadline
    #[error("Backend operation timed out after {0:?}")]
    Timeout(Duration),

    /// Subscriber fell behind and the backend dropped events
    #[error("Watch subscription lagged, {skipped} events skipped")]
    SubscriptionLagged { skipped: u64 },

    /// Backend terminated the subscription
    #[error("Watch subscription closed by backend")]
    SubscriptionClosed,

    /// Any other adapter-specific failure
    #[error(transparent)]
    Other(Box<dyn std::error::Error + Send + Sync>),
}
