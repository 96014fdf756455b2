//! Action registry: kind → handler dispatch table.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::context::RunContext;
use super::handler::ActionHandler;
use super::kind::{ActionKind, UnknownActionKind};
use super::outcome::{ActionResult, Outcome};
use crate::error::{Error, Result};

/// Type-erased handler so different handler types share one table.
///
/// Errors are flattened to strings at this boundary.
#[async_trait]
trait HandlerEntry: Send + Sync {
    async fn call(&self, parameters: &Value, ctx: &RunContext) -> std::result::Result<Value, String>;
}

struct TypedHandlerEntry<H> {
    handler: H,
}

#[async_trait]
impl<H> HandlerEntry for TypedHandlerEntry<H>
where
    H: ActionHandler,
{
    async fn call(&self, parameters: &Value, ctx: &RunContext) -> std::result::Result<Value, String> {
        self.handler
            .execute(parameters, ctx)
            .await
            .map_err(|e| e.to_string())
    }
}

/// Dispatch table from [`ActionKind`] to handler, fixed after [`build`](ActionRegistryBuilder::build).
///
/// # Example
///
/// ```ignore
/// let registry = ActionRegistry::builder()
///     .register(ActionKind::SendEmail, SmtpEmailHandler::new(&smtp)?)
///     .register(ActionKind::SendTelegram, TelegramHandler::new(token)?)
///     .handler_timeout(Duration::from_secs(30))
///     .build()?;
///
/// let outcome = registry.dispatch("sendEmail", &params, &ctx).await;
/// ```
pub struct ActionRegistry {
    entries: HashMap<ActionKind, Box<dyn HandlerEntry>>,
    handler_timeout: Option<Duration>,
}

impl ActionRegistry {
    /// Start building a registry.
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::default()
    }

    /// Returns `true` if a handler is registered for `kind`.
    pub fn contains(&self, kind: ActionKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Returns the number of registered handlers.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run the handler registered for `kind`.
    ///
    /// Never fails: an unknown or unregistered kind, a handler error, a
    /// panic inside the handler and an exceeded deadline all produce
    /// [`Outcome::Failure`].
    pub async fn dispatch(&self, kind: &str, parameters: &Value, ctx: &RunContext) -> Outcome {
        let entry = kind
            .parse::<ActionKind>()
            .ok()
            .and_then(|parsed| self.entries.get(&parsed));

        let Some(entry) = entry else {
            let reason = UnknownActionKind(kind.to_owned()).to_string();
            warn!(run_id = %ctx.run_id, stage = ctx.stage, action = kind, "No handler for action kind");
            return Outcome::failure(reason);
        };

        debug!(run_id = %ctx.run_id, stage = ctx.stage, action = kind, "Dispatching action");

        let call = AssertUnwindSafe(entry.call(parameters, ctx)).catch_unwind();
        let result = match self.handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    let reason = format!("action timed out after {}ms", limit.as_millis());
                    warn!(run_id = %ctx.run_id, stage = ctx.stage, action = kind, %reason, "Action failed");
                    return Outcome::failure(reason);
                }
            },
            None => call.await,
        };

        let outcome = match result {
            Ok(Ok(data)) => Outcome::success(data),
            Ok(Err(reason)) => Outcome::failure(reason),
            Err(panic) => Outcome::failure(format!("action panicked: {}", panic_message(&*panic))),
        };

        let report = ActionResult::from(&outcome);
        match &outcome {
            Outcome::Success { .. } => {
                info!(run_id = %ctx.run_id, stage = ctx.stage, action = kind, result = %report, "Action succeeded");
            }
            Outcome::Failure { reason } => {
                warn!(run_id = %ctx.run_id, stage = ctx.stage, action = kind, %reason, result = %report, "Action failed");
            }
        }

        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Builder for an [`ActionRegistry`].
#[derive(Default)]
pub struct ActionRegistryBuilder {
    entries: HashMap<ActionKind, Box<dyn HandlerEntry>>,
    duplicate_kind: Option<ActionKind>,
    handler_timeout: Option<Duration>,
}

impl ActionRegistryBuilder {
    /// Register the handler for `kind`.
    ///
    /// Each kind can be registered once; a duplicate is reported by
    /// [`build`](Self::build).
    pub fn register<H: ActionHandler>(mut self, kind: ActionKind, handler: H) -> Self {
        if self.entries.contains_key(&kind) {
            self.duplicate_kind.get_or_insert(kind);
            return self;
        }

        self.entries
            .insert(kind, Box::new(TypedHandlerEntry { handler }));
        self
    }

    /// Bound every handler call. Without this a hung handler stalls its
    /// partition indefinitely.
    pub fn handler_timeout(mut self, limit: Duration) -> Self {
        self.handler_timeout = Some(limit);
        self
    }

    pub fn build(self) -> Result<ActionRegistry> {
        if let Some(kind) = self.duplicate_kind {
            return Err(Error::DuplicateActionKind(kind));
        }

        Ok(ActionRegistry {
            entries: self.entries,
            handler_timeout: self.handler_timeout,
        })
    }
}
