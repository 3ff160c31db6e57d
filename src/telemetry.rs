//! Telemetry utilities for operation timing and span naming.

use std::time::Instant;

/// Guard for timing an operation and recording metrics.
///
/// Records operation latency when dropped.
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    /// Start timing an operation.
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        crate::metrics::record_operation(self.operation, duration);
    }
}

/// Standardized span constructors.
pub mod spans {
    use tracing::{Span, info_span};

    /// Span for one API operation.
    pub fn operation(name: &str, conn_id: Option<&str>) -> Span {
        if let Some(conn_id) = conn_id {
            info_span!("operation", name = %name, conn_id = %conn_id)
        } else {
            info_span!("operation", name = %name)
        }
    }

    /// Span for a push socket session.
    pub fn socket(conn_id: &str, peer: &str) -> Span {
        info_span!("socket", conn_id = %conn_id, peer = %peer)
    }

    /// Span for one garbage collection pass.
    pub fn sweep(kind: &str) -> Span {
        info_span!("sweep", kind = %kind)
    }
}
