//! Connection lifecycle metrics hooks.

use super::channel::ServerAddress;

/// Listener notified on connection lifecycle events.
///
/// Implementations must be cheap and non-blocking; they run on the calling
/// task.
pub trait MetricsListener: Send + Sync + 'static {
    /// A connection was created over a pooled channel.
    fn after_connection_created(&self, address: &ServerAddress);

    /// A connection gave its channel back to the pool.
    fn after_connection_released(&self, address: &ServerAddress);
}

/// Listener that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpMetricsListener;

impl MetricsListener for NoOpMetricsListener {
    fn after_connection_created(&self, _address: &ServerAddress) {}

    fn after_connection_released(&self, _address: &ServerAddress) {}
}
