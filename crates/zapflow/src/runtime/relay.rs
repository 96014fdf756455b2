//! Outbox relay: moves pending run markers onto the stage stream.

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::RelayConfig;
use crate::store::OutboxStore;
use crate::stream::{StageMessage, StagePublisher};

/// Publishes stage 0 of every run that has an outbox marker.
///
/// # Lifecycle
///
/// 1. Every `poll_interval`, read up to `batch_size` pending markers
/// 2. Publish `{runId, stage: 0}` for each, awaiting each ack in turn
/// 3. Delete the markers whose publish was acknowledged
/// 4. On a store or stream fault, back off and try again
///
/// A crash after 2 and before 3 republishes the same runs on restart.
/// Duplicates are expected; the executor and handlers tolerate them.
pub struct OutboxRelay<O, P>
where
    O: OutboxStore,
    P: StagePublisher,
{
    outbox: O,
    publisher: P,
    config: RelayConfig,
    worker_id: String,
}

impl<O, P> OutboxRelay<O, P>
where
    O: OutboxStore,
    P: StagePublisher,
{
    pub fn new(outbox: O, publisher: P, config: RelayConfig, worker_id: impl Into<String>) -> Self {
        Self {
            outbox,
            publisher,
            config,
            worker_id: worker_id.into(),
        }
    }

    /// Run until the shutdown receiver reads `true` (or its sender is dropped).
    ///
    /// A batch in progress is finished before the relay exits.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut poll_interval = interval(self.config.poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut failures = 0u32;

        info!(worker_id = %self.worker_id, "Outbox relay started");

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

            match self.relay_batch().await {
                Ok(_) => failures = 0,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.config.backoff.delay(failures);
                    warn!(
                        worker_id = %self.worker_id,
                        error = %e,
                        failures,
                        delay_ms = delay.as_millis() as u64,
                        "Relay batch failed, backing off"
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!(worker_id = %self.worker_id, "Outbox relay shutting down");
    }

    /// Publish and delete one batch of markers.
    ///
    /// Returns the number of markers relayed. Publication stops at the first
    /// failed publish; markers acknowledged before it are still deleted and
    /// the failure is returned.
    pub async fn relay_batch(&self) -> crate::Result<usize> {
        let markers = self.outbox.poll_markers(self.config.batch_size).await?;
        if markers.is_empty() {
            return Ok(0);
        }

        let mut published: Vec<Uuid> = Vec::with_capacity(markers.len());
        let mut failure = None;

        for marker in &markers {
            let message = StageMessage::first(marker.run_id);
            match self.publisher.publish(&message).await {
                Ok(()) => {
                    debug!(
                        worker_id = %self.worker_id,
                        marker_id = %marker.id,
                        run_id = %marker.run_id,
                        "Published first stage"
                    );
                    published.push(marker.id);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        if !published.is_empty() {
            self.outbox.delete_markers(&published).await?;
            info!(
                worker_id = %self.worker_id,
                relayed = published.len(),
                "Relayed runs"
            );
        }

        match failure {
            Some(e) => Err(e),
            None => Ok(published.len()),
        }
    }
}
