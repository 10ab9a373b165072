//! Tracing setup and span constructors.

use tracing_subscriber::EnvFilter;

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info` filter.
pub fn init(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init(),
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Span covering one connection attempt and its lifetime.
    pub fn connection(device_id: &str, attempt: u32) -> Span {
        info_span!("connection", device = %device_id, attempt)
    }

    /// Span covering one submitted mutation.
    pub fn action(operation: &str, idempotency_key: &str) -> Span {
        info_span!("action", op = %operation, key = %idempotency_key)
    }

    /// Span covering the dispatch of one entity update.
    pub fn dispatch(kind: &str, id: &str, source: &str) -> Span {
        info_span!("dispatch", kind = %kind, id = %id, source = %source)
    }
}
