use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::StreamExt;
use tokio::time::interval;
use tokio::time::timeout;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use super::Watchable;
use crate::metrics::WATCH_RESUBSCRIBE;
use crate::utils::backoff::Backoff;
use crate::Backend;
use crate::BackendError;
use crate::BackoffPolicy;
use crate::Error;
use crate::Result;
use crate::VersionedValue;
use crate::WatchConfig;
use crate::WatchStream;

/// Update task of one [`Watchable`].
///
/// Every `watch_chan_check_interval` it makes sure a subscription is open,
/// drains whatever the subscription has buffered, and publishes the newest
/// version. Subscription failures never end the loop; they are retried with
/// backoff until the watchable is closed.
pub(crate) struct WatchLoop {
    watchable: Arc<Watchable>,
    backend: Arc<dyn Backend>,
    backend_key: String,
    config: WatchConfig,
    backoff: Backoff,
    stream: Option<WatchStream>,
    last_activity: Instant,
}

impl WatchLoop {
    pub(crate) fn new(
        watchable: Arc<Watchable>,
        backend: Arc<dyn Backend>,
        backend_key: String,
        config: WatchConfig,
        retry: BackoffPolicy,
    ) -> Self {
        Self {
            watchable,
            backend,
            backend_key,
            config,
            backoff: Backoff::new(retry),
            stream: None,
            last_activity: Instant::now(),
        }
    }

    pub(crate) async fn run(
        mut self,
        cancel: CancellationToken,
    ) {
        debug!(
            key = %self.watchable.key(),
            watchable_id = self.watchable.id(),
            "watch loop started"
        );

        let mut ticker = interval(self.config.check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.check() => {}
            }
        }

        // Dropping the stream cancels the backend subscription
        self.stream = None;
        debug!(
            key = %self.watchable.key(),
            watchable_id = self.watchable.id(),
            "watch loop stopped"
        );
    }

    /// One polling cycle
    async fn check(&mut self) {
        let now = Instant::now();

        if self.subscription_idle(now) {
            debug!(
                key = %self.watchable.key(),
                idle_ms = now.duration_since(self.last_activity).as_millis() as u64,
                "watch subscription idle, recycling"
            );
            self.stream = None;
        }

        if self.stream.is_none() {
            if !self.backoff.ready(now) {
                return;
            }

            let opened = open_subscription(
                self.backend.as_ref(),
                &self.backend_key,
                self.config.init_timeout(),
                &self.watchable,
            )
            .await;
            match opened {
                Ok(stream) => {
                    WATCH_RESUBSCRIBE.with_label_values(&["ok"]).inc();
                    if self.backoff.failures() > 0 {
                        debug!(
                            key = %self.watchable.key(),
                            failures = self.backoff.failures(),
                            "watch subscription recovered"
                        );
                    }
                    self.stream = Some(stream);
                    self.last_activity = Instant::now();
                }
                Err(e) => {
                    WATCH_RESUBSCRIBE.with_label_values(&["err"]).inc();
                    let delay = self.backoff.record_failure(Instant::now());
                    warn!(
                        key = %self.watchable.key(),
                        failures = self.backoff.failures(),
                        retry_in_ms = delay.as_millis() as u64,
                        "failed to open watch subscription: {}",
                        e
                    );
                    return;
                }
            }
        }

        self.drain();
    }

    fn subscription_idle(
        &self,
        now: Instant,
    ) -> bool {
        match self.config.reset_interval() {
            Some(reset) => {
                self.stream.is_some() && now.duration_since(self.last_activity) >= reset
            }
            None => false,
        }
    }

    /// Takes every event already buffered without waiting and publishes only
    /// the newest.
    fn drain(&mut self) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        let mut latest: Option<VersionedValue> = None;
        let mut broken = false;
        loop {
            match stream.next().now_or_never() {
                Some(Some(Ok(value))) => {
                    if value.is_newer_than(latest.as_ref()) {
                        latest = Some(value);
                    }
                }
                Some(Some(Err(e))) => {
                    warn!(
                        key = %self.watchable.key(),
                        "watch subscription failed, resubscribing: {}",
                        e
                    );
                    broken = true;
                    break;
                }
                Some(None) => {
                    debug!(
                        key = %self.watchable.key(),
                        "watch subscription ended, resubscribing"
                    );
                    broken = true;
                    break;
                }
                None => break,
            }
        }

        // Only a stream that delivered something counts as healthy
        if latest.is_some() {
            self.backoff.reset();
        }
        if broken {
            self.stream = None;
            let delay = self.backoff.record_failure(Instant::now());
            debug!(
                key = %self.watchable.key(),
                failures = self.backoff.failures(),
                retry_in_ms = delay.as_millis() as u64,
                "watch subscription dropped"
            );
        }
        if let Some(value) = latest {
            self.last_activity = Instant::now();
            self.watchable.update(value);
        }
    }
}

/// Subscribes first, then reads, so no commit between the two is missed.
///
/// The read re-syncs the value after a fresh start, an outage or a lag
/// without replaying history. Borrows only what it needs: the loop itself
/// holds a stream that is not `Sync`.
async fn open_subscription(
    backend: &dyn Backend,
    backend_key: &str,
    init_timeout: Duration,
    watchable: &Watchable,
) -> Result<WatchStream> {
    let stream = timeout(init_timeout, backend.subscribe(backend_key))
        .await
        .map_err(|_| BackendError::Timeout(init_timeout))??;

    match timeout(init_timeout, backend.read(backend_key))
        .await
        .map_err(|_| BackendError::Timeout(init_timeout))?
    {
        Ok(value) => {
            watchable.update(value);
        }
        Err(Error::NotFound) => {}
        Err(e) => return Err(e),
    }

    Ok(stream)
}
