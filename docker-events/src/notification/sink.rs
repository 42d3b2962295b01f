//! Delivery contract between the grouper and the outbound side.

use async_trait::async_trait;

use crate::Result;
use crate::docker::DockerEvent;

/// Receives flushed events.
///
/// Errors are reported to whoever invoked the delivery. The grouper never
/// retries a failed delivery and only logs failures of timer-driven flushes.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Deliver one event on its own.
    async fn deliver_single(&self, event: &DockerEvent) -> Result<()>;

    /// Deliver two or more events buffered under `key`, in arrival order.
    async fn deliver_batch(&self, key: &str, events: &[DockerEvent]) -> Result<()>;
}
