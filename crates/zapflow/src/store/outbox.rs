//! Outbox marker storage, used only by the relay.

use std::future::Future;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::model::RunId;

/// "This run has a stage-0 message that has not been published yet."
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxMarker {
    /// Marker id (UUID v7).
    pub id: Uuid,
    /// The run to publish.
    pub run_id: RunId,
    pub created_at: OffsetDateTime,
}

/// Storage operations for the outbox relay.
///
/// # Delivery protocol
///
/// 1. `poll_markers` reads pending markers, oldest first; nothing is locked
/// 2. The relay publishes one message per marker and awaits each ack
/// 3. `delete_markers` removes exactly the markers that were acknowledged
///
/// A crash between 2 and 3 leaves the markers in place, so they are
/// published again on the next poll.
pub trait OutboxStore: Send + Sync + Clone + 'static {
    /// Fetch up to `limit` pending markers, oldest first.
    fn poll_markers(
        &self,
        limit: u32,
    ) -> impl Future<Output = crate::Result<Vec<OutboxMarker>>> + Send;

    /// Delete markers by id. Unknown ids are ignored.
    ///
    /// Returns the number of markers removed.
    fn delete_markers(&self, ids: &[Uuid]) -> impl Future<Output = crate::Result<u64>> + Send;
}
