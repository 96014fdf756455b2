//! Runtime for moving runs through their steps.
//!
//! - [`OutboxRelay`]: publishes stage 0 for every pending outbox marker
//! - [`StageExecutor`]: consumes stage messages, runs one step, hands off the next
//! - [`Pipeline`]: spawns both and coordinates shutdown
//! - [`PipelineConfig`]: polling intervals, batch size, partitions, timeouts
//!
//! # Example
//!
//! ```ignore
//! use zapflow::runtime::{Pipeline, PipelineConfig};
//!
//! let store = PgStore::new(pool.clone());
//! let stream = PgStream::new(pool, 3);
//! let pipeline = Pipeline::new(store, stream, Arc::new(actions), PipelineConfig::default());
//!
//! pipeline.run(shutdown_signal).await;
//! ```

mod config;
mod executor;
mod pipeline;
mod relay;

pub use config::{Backoff, ExecutorConfig, PipelineConfig, RelayConfig};
pub use executor::{StageDisposition, StageExecutor};
pub use pipeline::Pipeline;
pub use relay::OutboxRelay;
