//! In-process stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use super::{Delivery, StageConsumer, StageMessage, StagePublisher, partition_for};
use crate::error::{Error, Result};

/// [`StagePublisher`] and [`StageConsumer`] over in-memory partitions.
///
/// Cloning shares the log and the committed offsets, so a relay, an
/// executor and a test can all hold handles to the same stream.
#[derive(Debug, Clone)]
pub struct MemoryStream {
    partitions: u32,
    inner: Arc<Mutex<State>>,
}

#[derive(Debug, Default)]
struct State {
    log: Vec<Vec<Value>>,
    offsets: HashMap<(String, u32), i64>,
    fail_publishes: u32,
    fail_fetches: u32,
    fail_partition_fetches: HashMap<u32, u32>,
}

impl MemoryStream {
    /// Create a stream with `partitions` partitions (at least one).
    pub fn new(partitions: u32) -> Self {
        let partitions = partitions.max(1);
        let state = State {
            log: vec![Vec::new(); partitions as usize],
            ..State::default()
        };

        Self {
            partitions,
            inner: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every decodable message, grouped by partition in offset order.
    pub fn published(&self) -> Vec<StageMessage> {
        self.state()
            .log
            .iter()
            .flatten()
            .filter_map(|payload| serde_json::from_value(payload.clone()).ok())
            .collect()
    }

    /// Number of messages appended to `partition`.
    pub fn partition_len(&self, partition: u32) -> usize {
        self.state()
            .log
            .get(partition as usize)
            .map_or(0, Vec::len)
    }

    /// Append a raw payload, bypassing encoding. Returns its offset.
    pub fn append_raw(&self, partition: u32, payload: Value) -> i64 {
        let mut state = self.state();
        let index = (partition % self.partitions) as usize;
        state.log[index].push(payload);
        state.log[index].len() as i64 - 1
    }

    /// `group`'s next offset in `partition` (zero if never committed).
    pub fn committed(&self, group: &str, partition: u32) -> i64 {
        self.state()
            .offsets
            .get(&(group.to_owned(), partition))
            .copied()
            .unwrap_or(0)
    }

    /// Returns `true` once `group` has consumed every partition.
    pub fn is_drained(&self, group: &str) -> bool {
        let state = self.state();
        state.log.iter().enumerate().all(|(partition, messages)| {
            let committed = state
                .offsets
                .get(&(group.to_owned(), partition as u32))
                .copied()
                .unwrap_or(0);
            committed >= messages.len() as i64
        })
    }

    /// Make the next `n` publishes fail without appending.
    pub fn fail_next_publishes(&self, n: u32) {
        self.state().fail_publishes = n;
    }

    /// Make the next `n` fetches fail.
    pub fn fail_next_fetches(&self, n: u32) {
        self.state().fail_fetches = n;
    }

    /// Make the next `n` fetches from `partition` fail, leaving the other
    /// partitions readable.
    pub fn fail_next_fetches_from(&self, partition: u32, n: u32) {
        self.state().fail_partition_fetches.insert(partition, n);
    }
}

impl StagePublisher for MemoryStream {
    async fn publish(&self, message: &StageMessage) -> Result<()> {
        let payload = serde_json::to_value(message)?;
        let mut state = self.state();

        if state.fail_publishes > 0 {
            state.fail_publishes -= 1;
            return Err(Error::Unavailable("stream unavailable".into()));
        }

        let partition = partition_for(&message.run_id, self.partitions);
        state.log[partition as usize].push(payload);
        Ok(())
    }
}

impl StageConsumer for MemoryStream {
    fn partitions(&self) -> u32 {
        self.partitions
    }

    async fn fetch(&self, group: &str, partition: u32) -> Result<Option<Delivery>> {
        let mut state = self.state();

        if state.fail_fetches > 0 {
            state.fail_fetches -= 1;
            return Err(Error::Unavailable("stream unavailable".into()));
        }

        if let Some(remaining) = state.fail_partition_fetches.get_mut(&partition) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Unavailable(format!("partition {partition} unavailable")));
            }
        }

        let offset = state
            .offsets
            .get(&(group.to_owned(), partition))
            .copied()
            .unwrap_or(0);

        let payload = state
            .log
            .get(partition as usize)
            .and_then(|messages| messages.get(offset as usize))
            .cloned();

        Ok(payload.map(|payload| Delivery {
            partition,
            offset,
            payload,
        }))
    }

    async fn commit(&self, group: &str, partition: u32, next_offset: i64) -> Result<()> {
        self.state()
            .offsets
            .insert((group.to_owned(), partition), next_offset);
        Ok(())
    }
}
