//! Per-step execution context handed to action handlers.

use crate::model::{RunId, ZapId};

/// Context provided to action handlers during execution.
///
/// # Idempotency
///
/// Stages are delivered **at least once**: a relay crash after publishing,
/// or an executor crash before committing, re-runs the same stage. Use
/// [`idempotency_key()`](Self::idempotency_key) when calling providers that
/// can deduplicate requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunContext {
    /// The run being executed.
    pub run_id: RunId,

    /// The zap the run belongs to.
    pub zap_id: ZapId,

    /// Position of the step being executed.
    pub stage: u32,

    /// Number of steps in the zap.
    pub step_count: usize,
}

impl RunContext {
    pub fn new(run_id: RunId, zap_id: ZapId, stage: u32, step_count: usize) -> Self {
        Self {
            run_id,
            zap_id,
            stage,
            step_count,
        }
    }

    /// Key that is stable across redeliveries of the same stage.
    ///
    /// Format: `{run_id}:{stage}`
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.run_id, self.stage)
    }
}
