//! Storage abstraction for runs and their outbox markers.
//!
//! This module provides the [`RunStore`] and [`OutboxStore`] traits that
//! abstract over storage backends. Two implementations are provided:
//!
//! - [`PgStore`]: PostgreSQL storage for production (requires `postgres` feature)
//! - [`MemoryStore`]: in-process storage for tests and local experiments

mod memory;
mod outbox;
#[cfg(feature = "postgres")]
mod postgres;

use std::future::Future;

use serde_json::Value;

pub use memory::MemoryStore;
pub use outbox::{OutboxMarker, OutboxStore};
#[cfg(feature = "postgres")]
pub use postgres::PgStore;

use crate::error::Result;
use crate::model::{RunId, RunWithSteps, Zap, ZapId};

/// Durable record of runs, read by the ingestion gate and the stage executor.
///
/// Zaps and their steps are owned by the CRUD layer; the pipeline only reads
/// them. Runs are written once, together with their outbox marker, and never
/// updated.
pub trait RunStore: Send + Sync + Clone + 'static {
    /// Look up a zap by id.
    fn find_zap(&self, zap_id: &ZapId) -> impl Future<Output = Result<Option<Zap>>> + Send;

    /// Returns `true` if the zap exists and is switched on.
    fn is_workflow_active(&self, zap_id: &ZapId) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.find_zap(zap_id).await?.is_some_and(|zap| zap.active)) }
    }

    /// Record a run and its outbox marker in one transaction.
    ///
    /// Either both rows exist afterwards or neither does.
    fn create_run_with_marker(
        &self,
        zap_id: &ZapId,
        metadata: Value,
    ) -> impl Future<Output = Result<RunId>> + Send;

    /// Load a run and its zap's steps, ordered by position.
    ///
    /// Fails with [`Error::RunNotFound`](crate::Error::RunNotFound) if the run,
    /// or the zap it belongs to, no longer exists.
    fn load_run_with_steps(
        &self,
        run_id: RunId,
    ) -> impl Future<Output = Result<RunWithSteps>> + Send;
}
