use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Pacing, recovery and shutdown parameters for device scheduling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingConfig {
    /// Minimum time between two reads of the same tag
    pub min_read_interval_ms: u64,
    /// Minimum time between two writes of the same tag
    pub min_write_interval_ms: u64,
    /// Back-off before retrying a tag whose last transfer failed
    pub error_backoff_ms: u64,
    /// Minimum time between two restart attempts
    pub restart_interval_ms: u64,
    /// Device errors since the last restart that force a new restart
    pub device_error_threshold: u32,
    /// Consecutive failures of one tag that force a restart
    pub tag_error_threshold: u32,
    /// Upper bound of a single idle sleep in the work loop
    pub max_idle_wait_ms: u64,
    /// Sleep of the work loop while paused
    pub pause_poll_ms: u64,
    /// Cadence of the restart monitor
    pub monitor_interval_ms: u64,
    /// Shutdown waits until no write happened for this long
    pub drain_grace_ms: u64,
    /// Shutdown never completes sooner than this
    pub min_shutdown_delay_ms: u64,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            min_read_interval_ms: 100,
            min_write_interval_ms: 10,
            error_backoff_ms: 2000,
            restart_interval_ms: 5000,
            device_error_threshold: 10,
            tag_error_threshold: 3,
            max_idle_wait_ms: 250,
            pause_poll_ms: 100,
            monitor_interval_ms: 200,
            drain_grace_ms: 500,
            min_shutdown_delay_ms: 1000,
        }
    }
}

impl SchedulingConfig {
    pub fn min_read_interval(&self) -> Duration {
        Duration::from_millis(self.min_read_interval_ms)
    }

    pub fn min_write_interval(&self) -> Duration {
        Duration::from_millis(self.min_write_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn restart_interval(&self) -> Duration {
        Duration::from_millis(self.restart_interval_ms)
    }

    pub fn max_idle_wait(&self) -> Duration {
        Duration::from_millis(self.max_idle_wait_ms)
    }

    pub fn pause_poll(&self) -> Duration {
        Duration::from_millis(self.pause_poll_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn min_shutdown_delay(&self) -> Duration {
        Duration::from_millis(self.min_shutdown_delay_ms)
    }
}
