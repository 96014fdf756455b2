//! Durable trigger-to-action execution for "zaps": workflows made of an
//! external trigger followed by an ordered list of action steps.
//!
//! Zapflow provides the execution half of such a system:
//!
//! - **Atomic intake**: a trigger becomes a run plus an outbox marker in one
//!   transaction, so an accepted run is never lost
//! - **At-least-once relay**: markers are published to a partitioned stage
//!   stream and deleted only after the publish is acknowledged
//! - **Ordered stages**: every stage of a run lands on the same partition and
//!   a partition is consumed sequentially, so steps execute in order
//!
//! # Architecture
//!
//! ```text
//!  POST /webhook/catch/:user_id/:zap_id
//!           │
//!           ▼
//!  ┌─────────────────┐   run + marker   ┌──────────────┐
//!  │  IngestService  │ ───────────────▶ │   RunStore   │
//!  └─────────────────┘   (one txn)      └──────┬───────┘
//!                                              │ poll markers
//!                                              ▼
//!                                       ┌──────────────┐
//!                                       │ OutboxRelay  │
//!                                       └──────┬───────┘
//!                                              │ {runId, stage: 0}
//!                                              ▼
//!  ┌─────────────────┐  {runId, stage+1} ┌──────────────┐
//!  │  StageExecutor  │ ────────────────▶ │ stage stream │
//!  │                 │ ◀──────────────── │ (partitioned)│
//!  └────────┬────────┘                   └──────────────┘
//!           │ interpolate + dispatch
//!           ▼
//!  ┌─────────────────┐
//!  │ ActionRegistry  │ ──▶ sendEmail, sendTelegram, ...
//!  └─────────────────┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use zapflow::{PgStore, PgStream};
//! use zapflow::action::ActionRegistry;
//! use zapflow::runtime::{Pipeline, PipelineConfig};
//!
//! let store = PgStore::new(pool.clone());
//! let stream = PgStream::new(pool, 3);
//! let actions = ActionRegistry::builder()
//!     .register(ActionKind::SendEmail, SmtpEmailHandler::new(&smtp)?)
//!     .build()?;
//!
//! Pipeline::new(store, stream, Arc::new(actions), PipelineConfig::default())
//!     .run(shutdown_signal)
//!     .await;
//! ```
//!
//! # Feature Flags
//!
//! - `postgres`: enables [`PgStore`] and [`PgStream`]
//! - `integrations`: enables the SMTP and Telegram action handlers
//!
//! # Design Documentation
//!
//! See `DESIGN.md` for architectural decisions.

pub mod action;
mod error;
pub mod ingest;
mod model;
pub mod runtime;
pub mod store;
pub mod stream;
pub mod template;

pub use error::{Error, Result};
pub use ingest::{IngestError, IngestService};
pub use model::{Run, RunId, RunWithSteps, Step, UserId, Zap, ZapId};
pub use store::{MemoryStore, OutboxMarker, OutboxStore, RunStore};
#[cfg(feature = "postgres")]
pub use store::PgStore;
pub use stream::{Delivery, MemoryStream, StageConsumer, StageMessage, StagePublisher};
#[cfg(feature = "postgres")]
pub use stream::PgStream;
