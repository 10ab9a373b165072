//! Default value functions for configuration.

// =============================================================================
// Sync Defaults
// =============================================================================

pub fn default_handshake_timeout_ms() -> u64 {
    10_000
}

pub fn default_request_timeout_ms() -> u64 {
    15_000
}

pub fn default_max_reconnect_attempts() -> u32 {
    5
}

pub fn default_backoff_min_ms() -> u64 {
    500
}

pub fn default_backoff_max_ms() -> u64 {
    30_000
}

pub fn default_degraded_poll_interval_ms() -> u64 {
    30_000
}

pub fn default_degraded_retry_interval_ms() -> u64 {
    120_000
}

pub fn default_protocol_error_threshold() -> usize {
    3
}

pub fn default_protocol_error_window_ms() -> u64 {
    10_000
}

// =============================================================================
// Presence Defaults
// =============================================================================

pub fn default_liveness_window_secs() -> u64 {
    300
}

// =============================================================================
// Invitation Defaults
// =============================================================================

pub fn default_invitation_ttl_hours() -> u64 {
    168
}
