//! Action handlers and the registry that dispatches steps to them.
//!
//! - [`ActionKind`]: closed set of action identifiers a step can name
//! - [`ActionHandler`]: capability implemented by each integration
//! - [`ActionRegistry`]: kind → handler table, built once at startup
//! - [`Outcome`]: what a dispatch produced; never an error

mod context;
#[cfg(feature = "integrations")]
pub mod email;
mod handler;
mod kind;
mod outcome;
mod registry;
#[cfg(feature = "integrations")]
pub mod telegram;

pub use context::RunContext;
pub use handler::{ActionHandler, FnHandler, handler_fn};
pub use kind::{ActionKind, UnknownActionKind};
pub use outcome::{ActionResult, Outcome};
pub use registry::{ActionRegistry, ActionRegistryBuilder};

/// Current UTC time as RFC 3339, for the `sentAt` field integrations report.
#[cfg(feature = "integrations")]
pub(crate) fn sent_at() -> String {
    use time::format_description::well_known::Rfc3339;

    time::OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}
