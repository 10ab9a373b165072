//! Sync client tuning.

use serde::Deserialize;
use std::time::Duration;

use super::defaults::*;

/// Timeouts, reconnection policy and degraded-mode cadence.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Time allowed between `init` and `init_ack`.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Time allowed for one request/response round trip.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Consecutive failed attempts tolerated before entering degraded mode.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_backoff_min_ms")]
    pub backoff_min_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// How often subscribed streams are polled while degraded.
    #[serde(default = "default_degraded_poll_interval_ms")]
    pub degraded_poll_interval_ms: u64,
    /// How long to stay degraded before trying the stream again.
    #[serde(default = "default_degraded_retry_interval_ms")]
    pub degraded_retry_interval_ms: u64,
    /// Protocol errors within the window that force a reconnect.
    #[serde(default = "default_protocol_error_threshold")]
    pub protocol_error_threshold: usize,
    #[serde(default = "default_protocol_error_window_ms")]
    pub protocol_error_window_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            backoff_min_ms: default_backoff_min_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            degraded_poll_interval_ms: default_degraded_poll_interval_ms(),
            degraded_retry_interval_ms: default_degraded_retry_interval_ms(),
            protocol_error_threshold: default_protocol_error_threshold(),
            protocol_error_window_ms: default_protocol_error_window_ms(),
        }
    }
}

impl SyncConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn backoff_min(&self) -> Duration {
        Duration::from_millis(self.backoff_min_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn degraded_poll_interval(&self) -> Duration {
        Duration::from_millis(self.degraded_poll_interval_ms)
    }

    pub fn degraded_retry_interval(&self) -> Duration {
        Duration::from_millis(self.degraded_retry_interval_ms)
    }

    pub fn protocol_error_window(&self) -> Duration {
        Duration::from_millis(self.protocol_error_window_ms)
    }
}
