//! Action handler trait for executing step side effects.

use std::fmt::Display;
use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use super::context::RunContext;

/// Capability implemented by each outbound integration.
///
/// Handlers receive parameters that are **already interpolated**: template
/// resolution happens once, in the stage executor, before dispatch. A
/// handler decides *how* to send, never *what* to send.
///
/// # Results
///
/// | Result     | Dispatch outcome                         |
/// |------------|------------------------------------------|
/// | `Ok(data)` | [`Outcome::Success`](super::Outcome)     |
/// | `Err(e)`   | [`Outcome::Failure`](super::Outcome) with `e.to_string()` |
///
/// Neither result stops the chain: the next step runs either way.
///
/// # Idempotency
///
/// A stage may execute more than once. Handlers must tolerate duplicates,
/// ideally by passing [`RunContext::idempotency_key()`] to the provider.
///
/// # Example
///
/// ```ignore
/// struct SlackHandler { client: SlackClient }
///
/// #[async_trait]
/// impl ActionHandler for SlackHandler {
///     type Error = anyhow::Error;
///
///     async fn execute(&self, parameters: &Value, ctx: &RunContext) -> Result<Value, Self::Error> {
///         let channel = parameters["channel"].as_str().context("channel is required")?;
///         let text = parameters["text"].as_str().unwrap_or_default();
///         let ts = self.client.post(channel, text, ctx.idempotency_key()).await?;
///         Ok(json!({ "ts": ts }))
///     }
/// }
/// ```
#[async_trait]
pub trait ActionHandler: Send + Sync + 'static {
    /// The error type returned by this handler.
    ///
    /// Only its `Display` output survives; it becomes the failure reason.
    type Error: Display + Send + 'static;

    /// Perform the action described by `parameters`.
    async fn execute(&self, parameters: &Value, ctx: &RunContext) -> Result<Value, Self::Error>;
}

/// Adapter turning an async closure into an [`ActionHandler`].
///
/// Created with [`handler_fn`].
pub struct FnHandler<F>(F);

/// Build a handler from an async closure.
///
/// ```
/// use serde_json::{Value, json};
/// use zapflow::action::{RunContext, handler_fn};
///
/// let echo = handler_fn(|parameters: Value, _ctx: RunContext| async move {
///     Ok::<_, std::convert::Infallible>(json!({ "echo": parameters }))
/// });
/// # let _ = echo;
/// ```
pub fn handler_fn<F, Fut, E>(f: F) -> FnHandler<F>
where
    F: Fn(Value, RunContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut, E> ActionHandler for FnHandler<F>
where
    F: Fn(Value, RunContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    type Error = E;

    async fn execute(&self, parameters: &Value, ctx: &RunContext) -> Result<Value, Self::Error> {
        (self.0)(parameters.clone(), ctx.clone()).await
    }
}
