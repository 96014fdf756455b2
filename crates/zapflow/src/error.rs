//! Error types for zapflow.

use thiserror::Error;

use crate::action::ActionKind;
use crate::model::RunId;

/// A `Result` alias with [`enum@Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in zapflow operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to serialize or deserialize run, step or stream data.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// PostgreSQL storage error.
    ///
    /// Preserves the full `sqlx::Error` for matching on specific database
    /// error conditions (connection timeout, constraint violation, etc.).
    #[cfg(feature = "postgres")]
    #[error("postgres error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// The run, or the workflow it belongs to, no longer resolves.
    #[error("run not found: {0}")]
    RunNotFound(RunId),

    /// A stream message body does not match `{"runId", "stage"}`.
    #[error("invalid stage message at partition {partition} offset {offset}: {reason}")]
    InvalidStageMessage {
        /// Partition the message was read from.
        partition: u32,
        /// Offset of the message within its partition.
        offset: i64,
        /// Why the body was rejected.
        reason: String,
    },

    /// The event stream or store could not be reached.
    ///
    /// Workers treat this as transient and retry after backing off.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// An action kind was registered more than once.
    #[error("duplicate action kind registration: {0}")]
    DuplicateActionKind(ActionKind),
}

impl Error {
    /// Returns `true` for errors that no amount of retrying will fix.
    ///
    /// The stage executor discards (and commits past) messages that fail
    /// with one of these.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::RunNotFound(_) | Error::InvalidStageMessage { .. }
        )
    }
}
