use async_trait::async_trait;

use crate::error::SinkError;
use crate::record::Violation;

/// Destination for emitted violations.
///
/// The emitter guarantees at most one `publish` per `(rule, trace)` pair per
/// firing pass. Deduplication across passes beyond the configured window is
/// the sink's concern.
#[async_trait]
pub trait ViolationSink: Send + Sync {
    /// Hand a violation to durable storage or notification.
    async fn publish(&self, violation: Violation) -> Result<(), SinkError>;
}
