//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, ClientConfig, EndpointsConfig)
//! - [`sync`]: Sync client timeouts, reconnection and degraded-mode cadence
//! - [`validation`]: Startup checks that report every problem at once

mod defaults;
mod sync;
mod types;
mod validation;

pub use sync::SyncConfig;
pub use types::{
    ClientConfig, Config, ConfigError, EndpointsConfig, InvitationConfig, LoggingConfig,
    PresenceConfig,
};
pub use validation::{ValidationError, validate};

impl Config {
    /// Run [`validate`] on this configuration.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        validate(self)
    }
}
