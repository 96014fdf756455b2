use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde_json::Value;
use zapflow::action::{ActionKind, ActionRegistry, RunContext, handler_fn};
use zapflow::runtime::{Backoff, ExecutorConfig, PipelineConfig, RelayConfig};

/// Initialize tracing for tests. Safe to call multiple times.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("zapflow=debug")
        .try_init();
}

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Fast-polling configuration for pipeline tests.
pub fn test_pipeline_config() -> PipelineConfig {
    let backoff = Backoff {
        base: Duration::from_millis(20),
        max: Duration::from_millis(200),
    };

    PipelineConfig {
        relay: RelayConfig {
            poll_interval: Duration::from_millis(20),
            backoff: backoff.clone(),
            ..Default::default()
        },
        executor: ExecutorConfig {
            poll_interval: Duration::from_millis(10),
            backoff,
            ..Default::default()
        },
        shutdown_timeout: Duration::from_secs(5),
        worker_id: Some("test".into()),
        ..Default::default()
    }
}

/// One handler invocation as seen by [`recording_actions`].
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub kind: ActionKind,
    pub run_id: String,
    pub stage: u32,
    pub parameters: Value,
}

pub type Calls = Arc<Mutex<Vec<Call>>>;

/// Registry whose `sendEmail` and `sendTelegram` handlers record every call.
///
/// `sendTelegram` always fails, so tests can check that a failed step does
/// not stop the chain.
pub fn recording_actions() -> (ActionRegistry, Calls) {
    let calls: Calls = Arc::default();

    let email_calls = Arc::clone(&calls);
    let telegram_calls = Arc::clone(&calls);

    let actions = ActionRegistry::builder()
        .register(
            ActionKind::SendEmail,
            handler_fn(move |parameters, ctx: RunContext| {
                let calls = Arc::clone(&email_calls);
                async move {
                    calls.lock().unwrap().push(Call {
                        kind: ActionKind::SendEmail,
                        run_id: ctx.run_id.to_string(),
                        stage: ctx.stage,
                        parameters,
                    });
                    Ok::<_, String>(Value::Null)
                }
            }),
        )
        .register(
            ActionKind::SendTelegram,
            handler_fn(move |parameters, ctx: RunContext| {
                let calls = Arc::clone(&telegram_calls);
                async move {
                    calls.lock().unwrap().push(Call {
                        kind: ActionKind::SendTelegram,
                        run_id: ctx.run_id.to_string(),
                        stage: ctx.stage,
                        parameters,
                    });
                    Err::<Value, _>("chat not found".to_owned())
                }
            }),
        )
        .build()
        .unwrap();

    (actions, calls)
}

/// Poll a condition until it returns `Some` or the timeout elapses.
pub async fn wait_until<F, Fut, T>(timeout: Duration, interval: Duration, check: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if let Some(result) = check().await? {
            return Ok(result);
        }

        if tokio::time::Instant::now() > deadline {
            return Err(anyhow!("timeout waiting for condition"));
        }

        tokio::time::sleep(interval).await;
    }
}
