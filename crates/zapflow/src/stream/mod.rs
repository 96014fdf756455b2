//! Partitioned, ordered stream of stage messages.
//!
//! Every stage of a run travels as a [`StageMessage`] keyed by its run id,
//! so all stages of one run land on the same partition and are consumed in
//! order. Consumers track progress per `(group, partition)` and commit
//! explicitly; nothing is acknowledged implicitly on read.
//!
//! Two implementations are provided:
//!
//! - [`PgStream`]: a partitioned log in PostgreSQL (requires `postgres` feature)
//! - [`MemoryStream`]: in-process, with fault injection for tests

mod memory;
#[cfg(feature = "postgres")]
mod postgres;

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub use memory::MemoryStream;
#[cfg(feature = "postgres")]
pub use postgres::PgStream;

use crate::error::{Error, Result};
use crate::model::RunId;

/// Wire body of one stream message: `{"runId": "…", "stage": 0}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageMessage {
    pub run_id: RunId,
    /// Position of the step to execute.
    pub stage: u32,
}

impl StageMessage {
    /// The message that starts a run.
    pub fn first(run_id: RunId) -> Self {
        Self { run_id, stage: 0 }
    }

    /// The message for the following step of the same run.
    pub fn next(&self) -> Self {
        Self {
            run_id: self.run_id,
            stage: self.stage + 1,
        }
    }
}

/// A message read from a partition, not yet decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub partition: u32,
    pub offset: i64,
    pub payload: Value,
}

impl Delivery {
    /// Decode the payload as a [`StageMessage`].
    ///
    /// A malformed body yields [`Error::InvalidStageMessage`], which the
    /// executor treats as permanent.
    pub fn decode(&self) -> Result<StageMessage> {
        StageMessage::deserialize(&self.payload).map_err(|e| Error::InvalidStageMessage {
            partition: self.partition,
            offset: self.offset,
            reason: e.to_string(),
        })
    }
}

/// Map a run to its partition.
///
/// Uses the first four bytes of the SHA-256 digest of the run id's text
/// form, so the assignment is stable across processes and restarts. A
/// partition count of zero is treated as one.
pub fn partition_for(run_id: &RunId, partitions: u32) -> u32 {
    let digest = Sha256::digest(run_id.to_string().as_bytes());
    let prefix = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    prefix % partitions.max(1)
}

/// Appends stage messages to the stream.
pub trait StagePublisher: Send + Sync + Clone + 'static {
    /// Append `message` to the partition of its run.
    ///
    /// Resolves only once the message is durably stored; an `Ok` is the
    /// acknowledgement the relay and executor wait for.
    fn publish(&self, message: &StageMessage) -> impl Future<Output = Result<()>> + Send;
}

/// Reads stage messages with manually committed offsets.
pub trait StageConsumer: Send + Sync + Clone + 'static {
    /// Number of partitions in the stream.
    fn partitions(&self) -> u32;

    /// Read the message at `group`'s committed offset in `partition`.
    ///
    /// Returns `None` when the group is caught up. Until [`commit`] moves the
    /// offset forward, repeated calls return the same message.
    ///
    /// [`commit`]: StageConsumer::commit
    fn fetch(
        &self,
        group: &str,
        partition: u32,
    ) -> impl Future<Output = Result<Option<Delivery>>> + Send;

    /// Set `group`'s next offset in `partition`.
    fn commit(
        &self,
        group: &str,
        partition: u32,
        next_offset: i64,
    ) -> impl Future<Output = Result<()>> + Send;
}
