use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use watchable_kv::MemoryBackend;
use watchable_kv::Store;
use watchable_kv::StoreConfig;
use watchable_kv::VersionedValue;
use watchable_kv::WatchConfig;

pub const WAIT_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Clone, PartialEq, prost::Message)]
pub struct Placement {
    #[prost(string, tag = "1")]
    pub owner: String,
    #[prost(uint32, tag = "2")]
    pub shards: u32,
}

impl Placement {
    pub fn new(
        owner: &str,
        shards: u32,
    ) -> Self {
        Self {
            owner: owner.to_string(),
            shards,
        }
    }
}

pub fn new_store() -> (Store, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let config = StoreConfig {
        key_prefix: "/it/".to_string(),
        watch: WatchConfig {
            watch_chan_check_interval_ms: 10,
            ..WatchConfig::default()
        },
        ..StoreConfig::default()
    };
    let store = Store::new(backend.clone(), config).expect("valid config");
    (store, backend)
}

pub fn decode(value: Option<VersionedValue>) -> (Placement, u64) {
    let value = value.expect("value should be present");
    let placement = value.unmarshal().expect("payload should decode");
    (placement, value.version())
}

pub async fn within<F: Future>(fut: F) -> F::Output {
    timeout(WAIT_TIMEOUT, fut)
        .await
        .expect("timed out waiting for condition")
}
