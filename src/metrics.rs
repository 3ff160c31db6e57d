//! Prometheus metrics collection for channelstream.
//!
//! Exposed on the HTTP listener at `/metrics` when enabled. Every recording
//! helper is a no-op until [`init`] has run, so library code and tests can
//! call them freely.
//!
//! - `channelstream_operation_total{operation}` - API operations by name
//! - `channelstream_operation_duration_seconds{operation}` - Operation latency
//! - `channelstream_message_fanout` - Connections reached per message
//! - `channelstream_gc_reaped_total{kind}` - Entities removed by the sweeps

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

// ========================================================================
// Counters
// ========================================================================

/// Record copies enqueued on connections.
pub static MESSAGES_DELIVERED: OnceLock<IntCounter> = OnceLock::new();

/// Messages resolved by the dispatcher.
pub static MESSAGES_DISPATCHED: OnceLock<IntCounter> = OnceLock::new();

/// Payloads rejected by the dispatcher (bad timestamp, no recipients).
pub static MESSAGES_REJECTED: OnceLock<IntCounterVec> = OnceLock::new();

/// Operations by name.
pub static OPERATION_COUNTER: OnceLock<IntCounterVec> = OnceLock::new();

/// Operation errors by name and error code.
pub static OPERATION_ERRORS: OnceLock<IntCounterVec> = OnceLock::new();

/// Entities removed by garbage collection.
pub static GC_REAPED: OnceLock<IntCounterVec> = OnceLock::new();

/// Sweep loops restarted after a panic.
pub static GC_RESTARTS: OnceLock<IntCounter> = OnceLock::new();

// ========================================================================
// Gauges
// ========================================================================

pub static USERS: OnceLock<IntGauge> = OnceLock::new();
pub static CONNECTIONS: OnceLock<IntGauge> = OnceLock::new();
pub static CHANNELS: OnceLock<IntGauge> = OnceLock::new();

/// Open push sockets.
pub static SOCKETS: OnceLock<IntGauge> = OnceLock::new();

// ========================================================================
// Histograms
// ========================================================================

pub static OPERATION_LATENCY: OnceLock<HistogramVec> = OnceLock::new();

/// Connections reached by one message.
pub static MESSAGE_FANOUT: OnceLock<Histogram> = OnceLock::new();

/// Initialize the Prometheus metrics registry.
///
/// Must be called once at server startup before any metrics are recorded.
pub fn init() {
    let r = registry();

    // Helper macro to register metric
    macro_rules! register {
        ($metric:ident, $init:expr) => {
            let m = $init.expect(concat!(stringify!($metric), " creation failed"));
            if let Err(e) = r.register(Box::new(m.clone())) {
                tracing::warn!(error = %e, concat!("Failed to register metric ", stringify!($metric)));
            }
            let _ = $metric.set(m);
        };
    }

    register!(MESSAGES_DELIVERED, IntCounter::new("channelstream_messages_delivered_total", "Record copies enqueued on connections"));
    register!(MESSAGES_DISPATCHED, IntCounter::new("channelstream_messages_dispatched_total", "Messages resolved by the dispatcher"));
    register!(MESSAGES_REJECTED, IntCounterVec::new(Opts::new("channelstream_messages_rejected_total", "Payloads rejected by the dispatcher"), &["reason"]));
    register!(OPERATION_COUNTER, IntCounterVec::new(Opts::new("channelstream_operation_total", "API operations by name"), &["operation"]));
    register!(OPERATION_ERRORS, IntCounterVec::new(Opts::new("channelstream_operation_errors_total", "API operation errors"), &["operation", "error"]));
    register!(GC_REAPED, IntCounterVec::new(Opts::new("channelstream_gc_reaped_total", "Entities removed by garbage collection"), &["kind"]));
    register!(GC_RESTARTS, IntCounter::new("channelstream_gc_restarts_total", "Sweep loops restarted after a panic"));

    register!(USERS, IntGauge::new("channelstream_users", "Remembered users"));
    register!(CONNECTIONS, IntGauge::new("channelstream_connections", "Live connections"));
    register!(CHANNELS, IntGauge::new("channelstream_channels", "Live channels"));
    register!(SOCKETS, IntGauge::new("channelstream_sockets", "Open push sockets"));

    register!(OPERATION_LATENCY, HistogramVec::new(
        HistogramOpts::new("channelstream_operation_duration_seconds", "API operation latency")
            .buckets(vec![0.00005, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        &["operation"]));
    register!(MESSAGE_FANOUT, Histogram::with_opts(
        HistogramOpts::new("channelstream_message_fanout", "Connections reached per message")
            .buckets(vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 1000.0])));
}

/// Gather all metrics and encode them in Prometheus text format.
pub fn gather_metrics() -> String {
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
// Recording helpers
// ============================================================================

fn set_gauge(metric: &OnceLock<IntGauge>, value: usize) {
    if let Some(g) = metric.get() {
        g.set(i64::try_from(value).unwrap_or(i64::MAX));
    }
}

/// Record an operation execution with latency.
#[inline]
pub fn record_operation(operation: &str, duration_secs: f64) {
    if let Some(c) = OPERATION_COUNTER.get() {
        c.with_label_values(&[operation]).inc();
    }
    if let Some(h) = OPERATION_LATENCY.get() {
        h.with_label_values(&[operation]).observe(duration_secs);
    }
}

/// Record an operation error.
#[inline]
pub fn record_operation_error(operation: &str, error: &str) {
    if let Some(c) = OPERATION_ERRORS.get() {
        c.with_label_values(&[operation, error]).inc();
    }
}

/// Record one dispatched message and the copies it produced.
#[inline]
pub fn record_dispatch(delivered: usize) {
    if let Some(c) = MESSAGES_DISPATCHED.get() {
        c.inc();
    }
    if let Some(c) = MESSAGES_DELIVERED.get() {
        c.inc_by(delivered as u64);
    }
    if let Some(h) = MESSAGE_FANOUT.get() {
        h.observe(delivered as f64);
    }
}

#[inline]
pub fn record_rejected(reason: &str) {
    if let Some(c) = MESSAGES_REJECTED.get() {
        c.with_label_values(&[reason]).inc();
    }
}

/// Record entities removed by a sweep.
#[inline]
pub fn record_reaped(kind: &str, count: usize) {
    if count == 0 {
        return;
    }
    if let Some(c) = GC_REAPED.get() {
        c.with_label_values(&[kind]).inc_by(count as u64);
    }
}

#[inline]
pub fn record_gc_restart() {
    if let Some(c) = GC_RESTARTS.get() {
        c.inc();
    }
}

#[inline]
pub fn set_users(count: usize) {
    set_gauge(&USERS, count);
}

#[inline]
pub fn set_connections(count: usize) {
    set_gauge(&CONNECTIONS, count);
}

#[inline]
pub fn set_channels(count: usize) {
    set_gauge(&CHANNELS, count);
}

#[inline]
pub fn socket_opened() {
    if let Some(g) = SOCKETS.get() {
        g.inc();
    }
}

#[inline]
pub fn socket_closed() {
    if let Some(g) = SOCKETS.get() {
        g.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gather_includes_registered_families() {
        init();
        record_operation("connect", 0.001);
        record_dispatch(3);
        set_users(2);

        let text = gather_metrics();
        assert!(text.contains("channelstream_operation_total"));
        assert!(text.contains("channelstream_message_fanout"));
        assert!(text.contains("channelstream_users"));
    }
}
