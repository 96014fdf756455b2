//! Stage executor: runs one step per stream message and hands off the next.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use super::config::ExecutorConfig;
use crate::action::{ActionRegistry, RunContext};
use crate::store::RunStore;
use crate::stream::{Delivery, StageConsumer, StagePublisher};
use crate::template;

/// What processing one delivery led to. The offset is committed for all
/// three.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageDisposition {
    /// The step ran and the message for `next_stage` was acknowledged.
    Advanced { next_stage: u32 },
    /// The step ran and it was the run's last.
    Terminal,
    /// The message can never be processed (bad body, run gone, no such
    /// step) and is skipped.
    Discarded { reason: String },
}

/// Consumes stage messages from a fixed set of partitions.
///
/// # Lifecycle of one message
///
/// 1. Fetch the message at the committed offset of a partition
/// 2. Load the run and its steps; find the step at `stage`
/// 3. Interpolate the step's parameters against the run metadata
/// 4. Dispatch to the action registry (a `Failure` does not stop the chain)
/// 5. If steps remain, publish `stage + 1` and await the ack
/// 6. Commit `offset + 1`
///
/// A transient fault anywhere before 6 leaves the offset where it was, so
/// the same message is fetched again after a backoff and its step re-runs.
///
/// Partitions are served round-robin, one message at a time, so a busy
/// partition cannot starve the others. Within a partition processing is
/// strictly sequential.
pub struct StageExecutor<S, T>
where
    S: RunStore,
    T: StagePublisher + StageConsumer,
{
    store: S,
    stream: T,
    actions: Arc<ActionRegistry>,
    config: ExecutorConfig,
    partitions: Vec<u32>,
    worker_id: String,
}

impl<S, T> StageExecutor<S, T>
where
    S: RunStore,
    T: StagePublisher + StageConsumer,
{
    /// Create an executor owning `config.partitions`, or every partition of
    /// the stream when that is `None`.
    pub fn new(
        store: S,
        stream: T,
        actions: Arc<ActionRegistry>,
        config: ExecutorConfig,
        worker_id: impl Into<String>,
    ) -> Self {
        let partitions = owned_partitions(config.partitions.as_deref(), stream.partitions());
        Self::with_partitions(store, stream, actions, config, partitions, worker_id)
    }

    /// Create an executor owning exactly `partitions`.
    pub(crate) fn with_partitions(
        store: S,
        stream: T,
        actions: Arc<ActionRegistry>,
        config: ExecutorConfig,
        partitions: Vec<u32>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            store,
            stream,
            actions,
            config,
            partitions,
            worker_id: worker_id.into(),
        }
    }

    /// The partitions this executor consumes.
    pub fn partitions(&self) -> &[u32] {
        &self.partitions
    }

    /// Run until the shutdown receiver reads `true` (or its sender is dropped).
    ///
    /// The message in progress is finished, and its offset committed,
    /// before the executor exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut poll_interval = interval(self.config.poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut failures = 0u32;

        info!(
            worker_id = %self.worker_id,
            group = %self.config.consumer_group,
            partitions = ?self.partitions,
            "Stage executor started"
        );

        loop {
            tokio::select! {
                _ = poll_interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            // Drain everything available before waiting for the next tick.
            let result = loop {
                match self.poll_once().await {
                    Ok(0) => break Ok(()),
                    Ok(_) => {
                        if *shutdown.borrow() {
                            break Ok(());
                        }
                    }
                    Err(e) => break Err(e),
                }
            };

            match result {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.config.backoff.delay(failures);
                    warn!(
                        worker_id = %self.worker_id,
                        error = %e,
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        "Stage processing failed, backing off"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                }
            }

            if *shutdown.borrow() {
                break;
            }
        }

        info!(worker_id = %self.worker_id, "Stage executor shutting down");
    }

    /// Take one message from each owned partition that has one.
    ///
    /// Returns the number of messages processed and committed. A transient
    /// fault leaves that partition's offset unchanged and the remaining
    /// partitions are still served. The fault is returned only when no
    /// partition made progress.
    pub async fn poll_once(&self) -> crate::Result<usize> {
        let mut processed = 0;
        let mut failure = None;

        for &partition in &self.partitions {
            match self.poll_partition(partition).await {
                Ok(true) => processed += 1,
                Ok(false) => {}
                Err(e) => {
                    warn!(
                        worker_id = %self.worker_id,
                        partition,
                        error = %e,
                        "Partition poll failed"
                    );
                    failure.get_or_insert(e);
                }
            }
        }

        match failure {
            Some(e) if processed == 0 => Err(e),
            _ => Ok(processed),
        }
    }

    /// Process and commit the next message of `partition`, if any.
    async fn poll_partition(&self, partition: u32) -> crate::Result<bool> {
        let Some(delivery) = self
            .stream
            .fetch(&self.config.consumer_group, partition)
            .await?
        else {
            return Ok(false);
        };

        self.handle(&delivery).await?;
        Ok(true)
    }

    /// Process `delivery` and commit past it.
    async fn handle(&self, delivery: &Delivery) -> crate::Result<StageDisposition> {
        let disposition = self.process(delivery).await?;

        match &disposition {
            StageDisposition::Advanced { next_stage } => debug!(
                worker_id = %self.worker_id,
                partition = delivery.partition,
                offset = delivery.offset,
                next_stage,
                "Stage advanced"
            ),
            StageDisposition::Terminal => debug!(
                worker_id = %self.worker_id,
                partition = delivery.partition,
                offset = delivery.offset,
                "Run complete"
            ),
            StageDisposition::Discarded { reason } => warn!(
                worker_id = %self.worker_id,
                partition = delivery.partition,
                offset = delivery.offset,
                %reason,
                "Discarding unprocessable stage message"
            ),
        }

        self.stream
            .commit(
                &self.config.consumer_group,
                delivery.partition,
                delivery.offset + 1,
            )
            .await?;

        Ok(disposition)
    }

    /// Execute the step `delivery` names and publish its successor.
    ///
    /// Does not commit. Permanent problems come back as
    /// [`StageDisposition::Discarded`]; only transient faults are errors.
    pub async fn process(&self, delivery: &Delivery) -> crate::Result<StageDisposition> {
        let message = match delivery.decode() {
            Ok(message) => message,
            Err(e) => return Ok(StageDisposition::Discarded { reason: e.to_string() }),
        };

        let loaded = match self.store.load_run_with_steps(message.run_id).await {
            Ok(loaded) => loaded,
            Err(e) if e.is_permanent() => {
                return Ok(StageDisposition::Discarded { reason: e.to_string() });
            }
            Err(e) => return Err(e),
        };

        let Some(step) = loaded.step_at(message.stage) else {
            return Ok(StageDisposition::Discarded {
                reason: format!(
                    "run {} has no step at stage {}",
                    message.run_id, message.stage
                ),
            });
        };

        let parameters = template::resolve(&step.parameters, &loaded.run.metadata);
        let ctx = RunContext::new(
            message.run_id,
            loaded.run.zap_id.clone(),
            message.stage,
            loaded.steps.len(),
        );

        // The outcome is logged by the registry; either way the chain moves on.
        let outcome = self
            .actions
            .dispatch(&step.action_kind, &parameters, &ctx)
            .await;
        debug!(
            run_id = %message.run_id,
            stage = message.stage,
            success = outcome.is_success(),
            "Step dispatched"
        );

        match loaded.last_position() {
            Some(last) if message.stage < last => {
                let next = message.next();
                self.stream.publish(&next).await?;
                Ok(StageDisposition::Advanced {
                    next_stage: next.stage,
                })
            }
            _ => Ok(StageDisposition::Terminal),
        }
    }
}

/// Resolve the configured partition list against the stream's size.
///
/// Out-of-range entries are dropped with a warning and duplicates removed.
pub(crate) fn owned_partitions(configured: Option<&[u32]>, available: u32) -> Vec<u32> {
    let Some(configured) = configured else {
        return (0..available).collect();
    };

    let mut owned: Vec<u32> = configured
        .iter()
        .copied()
        .filter(|&partition| {
            let in_range = partition < available;
            if !in_range {
                warn!(partition, available, "Ignoring partition outside the stream");
            }
            in_range
        })
        .collect();
    owned.sort_unstable();
    owned.dedup();
    owned
}
