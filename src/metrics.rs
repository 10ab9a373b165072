//! Prometheus metrics for the sync client.
//!
//! - `kinsync_frames_received_total{frame}` - Inbound stream frames by type
//! - `kinsync_updates_applied_total{kind}` - Entity updates applied to stores
//! - `kinsync_updates_discarded_total{kind,reason}` - Updates dropped by the ordering gate
//! - `kinsync_protocol_errors_total{code}` - Malformed or unexpected input
//! - `kinsync_reconnect_attempts_total` - Connection attempts after the first
//! - `kinsync_state_transitions_total{state}` - Connection state changes
//! - `kinsync_queue_depth` - Mutations waiting in the offline queue
//! - `kinsync_action_outcomes_total{operation,outcome}` - Mutation results

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters
// ========================================================================

pub static FRAMES_RECEIVED: OnceLock<IntCounterVec> = OnceLock::new();
pub static UPDATES_APPLIED: OnceLock<IntCounterVec> = OnceLock::new();
pub static UPDATES_DISCARDED: OnceLock<IntCounterVec> = OnceLock::new();
pub static PROTOCOL_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();
pub static RECONNECT_ATTEMPTS: OnceLock<IntCounter> = OnceLock::new();
pub static STATE_TRANSITIONS: OnceLock<IntCounterVec> = OnceLock::new();
pub static ACTION_OUTCOMES: OnceLock<IntCounterVec> = OnceLock::new();

// ========================================================================
// Gauges
// ========================================================================

/// Mutations waiting in the offline queue, including the one in flight.
pub static QUEUE_DEPTH: OnceLock<IntGauge> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Safe to call more than once; later calls are no-ops for metrics that
/// already exist.
pub fn init() {
    let r = registry();

    macro_rules! register {
        ($metric:ident, $init:expr) => {
            if $metric.get().is_none() {
                match $init {
                    Ok(m) => {
                        if let Err(e) = r.register(Box::new(m.clone())) {
                            tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
                        }
                        let _ = $metric.set(m);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, concat!("Failed to create metric ", stringify!($metric)));
                    }
                }
            }
        };
    }

    register!(FRAMES_RECEIVED, IntCounterVec::new(Opts::new("kinsync_frames_received_total", "Inbound stream frames by type"), &["frame"]));
    register!(UPDATES_APPLIED, IntCounterVec::new(Opts::new("kinsync_updates_applied_total", "Entity updates applied"), &["kind"]));
    register!(UPDATES_DISCARDED, IntCounterVec::new(Opts::new("kinsync_updates_discarded_total", "Entity updates discarded"), &["kind", "reason"]));
    register!(PROTOCOL_ERRORS, IntCounterVec::new(Opts::new("kinsync_protocol_errors_total", "Protocol errors by code"), &["code"]));
    register!(RECONNECT_ATTEMPTS, IntCounter::new("kinsync_reconnect_attempts_total", "Reconnection attempts"));
    register!(STATE_TRANSITIONS, IntCounterVec::new(Opts::new("kinsync_state_transitions_total", "Connection state transitions"), &["state"]));
    register!(ACTION_OUTCOMES, IntCounterVec::new(Opts::new("kinsync_action_outcomes_total", "Mutation outcomes"), &["operation", "outcome"]));
    register!(QUEUE_DEPTH, IntGauge::new("kinsync_queue_depth", "Mutations waiting in the offline queue"));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode Prometheus metrics");
        return String::new();
    }
    match String::from_utf8(buffer) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "Prometheus metrics were not valid UTF-8");
            String::new()
        }
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn inc_vec(metric: &OnceLock<IntCounterVec>, labels: &[&str]) {
    if let Some(c) = metric.get() {
        c.with_label_values(labels).inc();
    }
}

#[inline]
pub fn record_frame(frame: &str) {
    inc_vec(&FRAMES_RECEIVED, &[frame]);
}

#[inline]
pub fn record_applied(kind: &str) {
    inc_vec(&UPDATES_APPLIED, &[kind]);
}

#[inline]
pub fn record_discarded(kind: &str, reason: &str) {
    inc_vec(&UPDATES_DISCARDED, &[kind, reason]);
}

#[inline]
pub fn record_protocol_error(code: &str) {
    inc_vec(&PROTOCOL_ERRORS, &[code]);
}

#[inline]
pub fn record_reconnect_attempt() {
    if let Some(c) = RECONNECT_ATTEMPTS.get() {
        c.inc();
    }
}

#[inline]
pub fn record_state(state: &str) {
    inc_vec(&STATE_TRANSITIONS, &[state]);
}

#[inline]
pub fn record_action(operation: &str, outcome: &str) {
    inc_vec(&ACTION_OUTCOMES, &[operation, outcome]);
}

#[inline]
pub fn set_queue_depth(depth: usize) {
    if let Some(g) = QUEUE_DEPTH.get() {
        g.set(depth as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_lifecycle() {
        init();
        init();

        record_applied("order");
        record_state("connected");
        set_queue_depth(2);

        let output = gather_text();
        assert!(output.contains("kinsync_updates_applied_total"));
        assert!(output.contains("kinsync_queue_depth"));
    }
}
