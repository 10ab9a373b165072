//! Core configuration types and loading.

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use super::defaults::*;
use super::sync::SyncConfig;
use crate::model::{EmailAddress, FamilyId, UserId};
use crate::telemetry::LogFormat;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "config_io",
            Self::Parse(_) => "config_parse",
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Device and user identity.
    pub client: ClientConfig,
    /// Where the event stream and request channel live.
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub invitations: InvitationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Identity of this device and its signed-in user.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    /// Stable identifier sent in `init`.
    pub device_id: String,
    pub user_id: UserId,
    pub email: EmailAddress,
    /// Family whose streams are subscribed on startup.
    #[serde(default)]
    pub family_id: Option<FamilyId>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EndpointsConfig {
    /// WebSocket URL of the event stream (e.g. "wss://sync.example.com/stream").
    pub stream_url: String,
    /// Base URL of the request channel; requests go to `{request_url}/rpc`.
    pub request_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    /// Records older than this count as offline.
    #[serde(default = "default_liveness_window_secs")]
    pub liveness_window_secs: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            liveness_window_secs: default_liveness_window_secs(),
        }
    }
}

impl PresenceConfig {
    pub fn liveness_window(&self) -> Duration {
        Duration::from_secs(self.liveness_window_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvitationConfig {
    /// Pending invitations older than this read as expired.
    #[serde(default = "default_invitation_ttl_hours")]
    pub ttl_hours: u64,
}

impl Default for InvitationConfig {
    fn default() -> Self {
        Self {
            ttl_hours: default_invitation_ttl_hours(),
        }
    }
}

impl InvitationConfig {
    pub fn ttl(&self) -> chrono::Duration {
        i64::try_from(self.ttl_hours)
            .ok()
            .and_then(chrono::Duration::try_hours)
            .unwrap_or(chrono::Duration::MAX)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}
