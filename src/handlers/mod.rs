//! API operations.
//!
//! [`Api`] is the single entry point used by the HTTP and socket adapters.
//! Every operation validates its request before touching the store, takes
//! the store lock at most once, and never holds it across an `.await`.

mod channel;
mod connection;
mod listen;
mod messaging;
mod server_query;
mod user_status;

pub use listen::render_batch;
#[cfg(test)]
pub use messaging::pass_message;

use crate::config::DeliveryConfig;
use crate::error::{ApiError, ApiResult};
use crate::state::Store;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Core operations over a shared [`Store`].
pub struct Api {
    store: Arc<Store>,
    /// How long a poll waits for its first record.
    wake_after: Duration,
    /// Length of each drain attempt after the first record.
    drain_window: Duration,
}

impl Api {
    pub fn new(store: Arc<Store>, delivery: &DeliveryConfig) -> Self {
        Self {
            store,
            wake_after: delivery.wake_after(),
            drain_window: delivery.drain_window(),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

/// Extract a required, non-empty string field.
fn required(value: Option<String>, field: &str) -> ApiResult<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::invalid(format!("{field} is required")))
}

/// Record a failed operation in metrics and logs.
fn observe<T>(operation: &'static str, result: ApiResult<T>) -> ApiResult<T> {
    if let Err(e) = &result {
        crate::metrics::record_operation_error(operation, e.error_code());
        debug!(operation, error = %e, "Operation rejected");
    }
    result
}
