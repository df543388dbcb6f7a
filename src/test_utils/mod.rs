//! Shared helpers for unit tests
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;

use crate::MemoryBackend;
use crate::Store;
use crate::StoreConfig;
use crate::VersionedValue;
use crate::WatchConfig;

/// Test payload, the smallest message a store can carry
#[derive(Clone, PartialEq, prost::Message)]
pub(crate) struct Foo {
    #[prost(string, tag = "1")]
    pub msg: String,
}

impl Foo {
    pub(crate) fn new(msg: &str) -> Self {
        Self {
            msg: msg.to_string(),
        }
    }
}

/// Config with a 10ms check interval so watch tests converge quickly
pub(crate) fn fast_config() -> StoreConfig {
    StoreConfig {
        watch: WatchConfig {
            watch_chan_check_interval_ms: 10,
            ..WatchConfig::default()
        },
        ..StoreConfig::default()
    }
}

pub(crate) fn test_store() -> (Store, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let store = Store::new(backend.clone(), fast_config()).expect("valid config");
    (store, backend)
}

#[track_caller]
pub(crate) fn verify_value(
    value: Option<VersionedValue>,
    msg: &str,
    version: u64,
) {
    let value = value.expect("value should be present");
    let decoded: Foo = value.unmarshal().expect("payload should decode");
    assert_eq!(decoded.msg, msg);
    assert_eq!(value.version(), version);
}

/// Awaits `fut`, failing the test after two seconds
pub(crate) async fn within<F: Future>(fut: F) -> F::Output {
    timeout(Duration::from_secs(2), fut)
        .await
        .expect("timed out waiting for condition")
}

/// Polls `condition` until it holds, failing the test after two seconds
pub(crate) async fn wait_until<F>(mut condition: F)
where
    F: FnMut() -> bool,
{
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
}
