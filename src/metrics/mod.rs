//! Prometheus collectors for the store and its shared watches.
//!
//! Collectors live in a crate-owned [`REGISTRY`]; the hosting process decides
//! how to expose them (see [`gather_metrics`]).

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;
use tracing::warn;

lazy_static! {
    pub static ref ACTIVE_WATCHABLES: IntGauge = IntGauge::new(
        "kv_watchables_active",
        "Number of keys with a live shared backend subscription"
    )
    .expect("metric can not be created");

    pub static ref ACTIVE_WATCH_HANDLES: IntGauge = IntGauge::new(
        "kv_watch_handles_active",
        "Number of open watch handles across all keys"
    )
    .expect("metric can not be created");

    pub static ref WATCH_NOTIFICATIONS: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "kv_watch_notifications_total",
            "Watch notifications by outcome (sent or coalesced into a pending one)"
        ),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref WATCH_RESUBSCRIBE: IntCounterVec = IntCounterVec::new(
        Opts::new(
            "kv_watch_resubscribe_total",
            "Backend subscription (re)open attempts by result"
        ),
        &["result"]
    )
    .expect("metric can not be created");

    pub static ref KV_OPS: IntCounterVec = IntCounterVec::new(
        Opts::new("kv_ops_total", "Store operations by kind and result"),
        &["op", "result"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

/// Registers every collector in [`REGISTRY`]; later calls are no-ops.
pub fn register_custom_metrics() {
    REGISTER.call_once(|| {
        let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
            Box::new(ACTIVE_WATCHABLES.clone()),
            Box::new(ACTIVE_WATCH_HANDLES.clone()),
            Box::new(WATCH_NOTIFICATIONS.clone()),
            Box::new(WATCH_RESUBSCRIBE.clone()),
            Box::new(KV_OPS.clone()),
        ];
        for collector in collectors {
            if let Err(e) = REGISTRY.register(collector) {
                warn!("metric collector could not be registered: {:?}", e);
            }
        }
    });
}

/// Text exposition of [`REGISTRY`] for a Prometheus scrape endpoint
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        warn!("could not encode custom metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Label value for an operation outcome
pub(crate) fn op_result<T>(result: &crate::Result<T>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) if e.is_conditional_failure() => "conditional_failure",
        Err(_) => "error",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_metrics_are_exported() {
        register_custom_metrics();
        register_custom_metrics();

        KV_OPS.with_label_values(&["get", "ok"]).inc();
        WATCH_NOTIFICATIONS.with_label_values(&["sent"]).inc();

        let body = gather_metrics();
        assert!(body.contains("kv_ops_total"));
        assert!(body.contains("kv_watch_notifications_total"));
    }

    #[test]
    fn test_op_result_labels() {
        assert_eq!(op_result(&Ok::<_, crate::Error>(1)), "ok");
        assert_eq!(
            op_result::<u64>(&Err(crate::Error::VersionMismatch)),
            "conditional_failure"
        );
        assert_eq!(op_result::<u64>(&Err(crate::Error::StoreClosed)), "error");
    }
}
