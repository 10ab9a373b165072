//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::Config;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("client.device_id is required")]
    MissingDeviceId,
    #[error("endpoints.stream_url must start with ws:// or wss://, got '{0}'")]
    InvalidStreamUrl(String),
    #[error("endpoints.request_url must start with http:// or https://, got '{0}'")]
    InvalidRequestUrl(String),
    #[error("sync.{0} must be greater than zero")]
    Zero(&'static str),
    #[error("sync.backoff_min_ms ({min}) exceeds sync.backoff_max_ms ({max})")]
    BackoffRange { min: u64, max: u64 },
    #[error("sync.degraded_retry_interval_ms must not be shorter than sync.degraded_poll_interval_ms")]
    DegradedCadence,
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.client.device_id.trim().is_empty() {
        errors.push(ValidationError::MissingDeviceId);
    }

    let stream_url = &config.endpoints.stream_url;
    if !(stream_url.starts_with("ws://") || stream_url.starts_with("wss://")) {
        errors.push(ValidationError::InvalidStreamUrl(stream_url.clone()));
    }
    let request_url = &config.endpoints.request_url;
    if !(request_url.starts_with("http://") || request_url.starts_with("https://")) {
        errors.push(ValidationError::InvalidRequestUrl(request_url.clone()));
    }

    let sync = &config.sync;
    let positive: [(&'static str, u64); 7] = [
        ("handshake_timeout_ms", sync.handshake_timeout_ms),
        ("request_timeout_ms", sync.request_timeout_ms),
        ("backoff_min_ms", sync.backoff_min_ms),
        ("degraded_poll_interval_ms", sync.degraded_poll_interval_ms),
        ("degraded_retry_interval_ms", sync.degraded_retry_interval_ms),
        ("protocol_error_threshold", sync.protocol_error_threshold as u64),
        ("protocol_error_window_ms", sync.protocol_error_window_ms),
    ];
    for (name, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(name));
        }
    }
    if sync.backoff_min_ms > sync.backoff_max_ms {
        errors.push(ValidationError::BackoffRange {
            min: sync.backoff_min_ms,
            max: sync.backoff_max_ms,
        });
    }
    if sync.degraded_retry_interval_ms < sync.degraded_poll_interval_ms {
        errors.push(ValidationError::DegradedCadence);
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}
