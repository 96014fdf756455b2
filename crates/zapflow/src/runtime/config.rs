//! Runtime configuration.

use std::time::Duration;

/// Exponential backoff applied after transient store or stream faults.
///
/// The delay after the Nth consecutive failure is
/// `min(base * 2^(N-1), max)`. A success resets the count.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use zapflow::runtime::Backoff;
///
/// let backoff = Backoff {
///     base: Duration::from_millis(200),
///     max: Duration::from_secs(5),
/// };
/// assert_eq!(backoff.delay(1), Duration::from_millis(200));
/// assert_eq!(backoff.delay(3), Duration::from_millis(800));
/// assert_eq!(backoff.delay(20), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    /// Delay after the first failure. Default: 500ms.
    pub base: Duration,

    /// Upper bound on the delay. Default: 30 seconds.
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_secs(30),
        }
    }
}

impl Backoff {
    /// Delay before retrying after `failures` consecutive failures (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        let multiplier = 2u32.saturating_pow(failures.saturating_sub(1));
        self.base.saturating_mul(multiplier).min(self.max)
    }
}

/// Configuration for the outbox relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Pause between batches. Default: 2 seconds.
    pub poll_interval: Duration,

    /// Maximum markers published per batch. Default: 3.
    ///
    /// Small batches bound memory and keep the first message of each batch
    /// from waiting on the rest.
    pub batch_size: u32,

    pub backoff: Backoff,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            batch_size: 3,
            backoff: Backoff::default(),
        }
    }
}

/// Configuration for stage executors.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Consumer group whose offsets the executors commit.
    ///
    /// Default: `zapflow-executor`.
    pub consumer_group: String,

    /// Partitions this process owns. `None` means every partition.
    ///
    /// Processes sharing a consumer group must own disjoint sets; the
    /// partition is the only thing keeping two executors off the same run.
    pub partitions: Option<Vec<u32>>,

    /// How often an idle executor checks its partitions again.
    /// Default: 100ms.
    pub poll_interval: Duration,

    pub backoff: Backoff,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            consumer_group: "zapflow-executor".to_owned(),
            partitions: None,
            poll_interval: Duration::from_millis(100),
            backoff: Backoff::default(),
        }
    }
}

/// Configuration for a [`Pipeline`](super::Pipeline).
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use zapflow::runtime::{ExecutorConfig, PipelineConfig};
///
/// // Executors only, owning partitions 0-3 split across two workers.
/// let config = PipelineConfig {
///     relay_workers: 0,
///     executor_workers: 2,
///     executor: ExecutorConfig {
///         partitions: Some(vec![0, 1, 2, 3]),
///         ..Default::default()
///     },
///     shutdown_timeout: Duration::from_secs(10),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub relay: RelayConfig,
    pub executor: ExecutorConfig,

    /// Number of relay loops to spawn. Zero disables the relay.
    ///
    /// More than one relay is safe but publishes duplicates. Default: 1.
    pub relay_workers: usize,

    /// Number of executor loops to spawn. Zero disables execution.
    ///
    /// Owned partitions are split between them. Default: 1.
    pub executor_workers: usize,

    /// Maximum time to wait for in-flight stages during shutdown.
    ///
    /// Default: 30 seconds.
    pub shutdown_timeout: Duration,

    /// Prefix for worker ids in logs. If `None`, a UUID is generated at
    /// startup.
    pub worker_id: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            executor: ExecutorConfig::default(),
            relay_workers: 1,
            executor_workers: 1,
            shutdown_timeout: Duration::from_secs(30),
            worker_id: None,
        }
    }
}
