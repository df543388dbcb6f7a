use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use crate::Error;
use crate::Result;

/// Settings for the per-key Watchable update loop
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// Cadence at which each Watchable checks its backend subscription
    ///
    /// Every check drains whatever the subscription has buffered and
    /// publishes only the newest version. Lower values reduce notification
    /// latency at the cost of more wakeups; correctness does not depend on it.
    ///
    /// **Default**: 100
    #[serde(default = "default_watch_chan_check_interval_ms")]
    pub watch_chan_check_interval_ms: u64,

    /// Recycle a subscription that has been silent for this long
    ///
    /// The subscription is dropped, reopened and re-synced with a read.
    /// Guards against backends that silently stop delivering events.
    ///
    /// **Default**: 0 (disabled)
    #[serde(default = "default_watch_chan_reset_interval_ms")]
    pub watch_chan_reset_interval_ms: u64,

    /// Upper bound for opening a subscription and its re-sync read
    ///
    /// **Default**: 5000
    #[serde(default = "default_watch_chan_init_timeout_ms")]
    pub watch_chan_init_timeout_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            watch_chan_check_interval_ms: default_watch_chan_check_interval_ms(),
            watch_chan_reset_interval_ms: default_watch_chan_reset_interval_ms(),
            watch_chan_init_timeout_ms: default_watch_chan_init_timeout_ms(),
        }
    }
}

impl WatchConfig {
    /// Validates watch configuration parameters
    pub fn validate(&self) -> Result<()> {
        if self.watch_chan_check_interval_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.watch_chan_check_interval_ms must be greater than 0".into(),
            )));
        }

        if self.watch_chan_init_timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "watch.watch_chan_init_timeout_ms must be greater than 0".into(),
            )));
        }

        if self.watch_chan_reset_interval_ms != 0
            && self.watch_chan_reset_interval_ms < self.watch_chan_check_interval_ms
        {
            return Err(Error::Config(ConfigError::Message(format!(
                "watch.watch_chan_reset_interval_ms ({}) must be 0 or at least watch_chan_check_interval_ms ({})",
                self.watch_chan_reset_interval_ms, self.watch_chan_check_interval_ms
            ))));
        }

        if self.watch_chan_check_interval_ms > 60_000 {
            warn!(
                "watch.watch_chan_check_interval_ms ({}) is very large; watchers may lag the backend by up to that long",
                self.watch_chan_check_interval_ms
            );
        }

        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.watch_chan_check_interval_ms)
    }

    pub fn reset_interval(&self) -> Option<Duration> {
        match self.watch_chan_reset_interval_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_millis(self.watch_chan_init_timeout_ms)
    }
}

const fn default_watch_chan_check_interval_ms() -> u64 {
    100
}

const fn default_watch_chan_reset_interval_ms() -> u64 {
    0
}

const fn default_watch_chan_init_timeout_ms() -> u64 {
    5000
}
