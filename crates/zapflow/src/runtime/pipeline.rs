//! Pipeline: spawns relay and executor workers and coordinates shutdown.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use super::config::PipelineConfig;
use super::executor::{StageExecutor, owned_partitions};
use super::relay::OutboxRelay;
use crate::action::ActionRegistry;
use crate::store::{OutboxStore, RunStore};
use crate::stream::{StageConsumer, StagePublisher};

/// The asynchronous half of zapflow: outbox relay plus stage executors.
///
/// # Example
///
/// ```ignore
/// use zapflow::runtime::{Pipeline, PipelineConfig};
///
/// let pipeline = Pipeline::new(store, stream, Arc::new(actions), PipelineConfig::default());
///
/// pipeline.run(async {
///     tokio::signal::ctrl_c().await.ok();
/// }).await;
/// ```
pub struct Pipeline<S, T>
where
    S: RunStore + OutboxStore,
    T: StagePublisher + StageConsumer,
{
    store: S,
    stream: T,
    actions: Arc<ActionRegistry>,
    config: PipelineConfig,
    worker_id: String,
}

impl<S, T> Pipeline<S, T>
where
    S: RunStore + OutboxStore,
    T: StagePublisher + StageConsumer,
{
    pub fn new(store: S, stream: T, actions: Arc<ActionRegistry>, config: PipelineConfig) -> Self {
        let worker_id = config
            .worker_id
            .clone()
            .unwrap_or_else(|| Uuid::now_v7().to_string());

        Self {
            store,
            stream,
            actions,
            config,
            worker_id,
        }
    }

    /// Run workers until `shutdown` completes.
    ///
    /// This method:
    /// 1. Spawns `relay_workers` relays and `executor_workers` executors
    /// 2. Waits for the shutdown future to complete
    /// 3. Signals every worker to stop once its current message is done
    /// 4. Waits up to `shutdown_timeout` for them, then returns regardless
    pub async fn run<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut worker_handles = Vec::new();

        for i in 0..self.config.relay_workers {
            let worker_id = if self.config.relay_workers == 1 {
                format!("{}-relay", self.worker_id)
            } else {
                format!("{}-relay-{}", self.worker_id, i)
            };

            let relay = OutboxRelay::new(
                self.store.clone(),
                self.stream.clone(),
                self.config.relay.clone(),
                worker_id,
            );

            let relay_shutdown_rx = shutdown_rx.clone();
            worker_handles.push(tokio::spawn(relay.run(relay_shutdown_rx)));
        }

        let assignments = split_partitions(
            &owned_partitions(
                self.config.executor.partitions.as_deref(),
                self.stream.partitions(),
            ),
            self.config.executor_workers,
        );
        let executor_count = assignments.len();

        for (i, partitions) in assignments.into_iter().enumerate() {
            let worker_id = if executor_count == 1 {
                format!("{}-executor", self.worker_id)
            } else {
                format!("{}-executor-{}", self.worker_id, i)
            };

            let executor = StageExecutor::with_partitions(
                self.store.clone(),
                self.stream.clone(),
                Arc::clone(&self.actions),
                self.config.executor.clone(),
                partitions,
                worker_id,
            );

            let executor_shutdown_rx = shutdown_rx.clone();
            worker_handles.push(tokio::spawn(executor.run(executor_shutdown_rx)));
        }

        info!(
            worker_id = %self.worker_id,
            relays = self.config.relay_workers,
            executors = executor_count,
            actions = self.actions.len(),
            "Pipeline started"
        );

        shutdown.await;

        let _ = shutdown_tx.send(true);

        let shutdown_timeout = self.config.shutdown_timeout;
        let all_workers = async {
            for handle in worker_handles {
                let _ = handle.await;
            }
        };

        match tokio::time::timeout(shutdown_timeout, all_workers).await {
            Ok(()) => {
                info!(worker_id = %self.worker_id, "Pipeline stopped gracefully");
            }
            Err(_) => {
                warn!(
                    worker_id = %self.worker_id,
                    timeout_secs = shutdown_timeout.as_secs(),
                    "Shutdown timeout exceeded, forcing stop"
                );
            }
        }
    }
}

/// Deal `partitions` round-robin into at most `workers` disjoint, non-empty
/// sets.
fn split_partitions(partitions: &[u32], workers: usize) -> Vec<Vec<u32>> {
    let workers = workers.min(partitions.len());
    if workers == 0 {
        return Vec::new();
    }

    let mut sets = vec![Vec::new(); workers];
    for (i, &partition) in partitions.iter().enumerate() {
        sets[i % workers].push(partition);
    }
    sets
}
