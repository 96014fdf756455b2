use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use zapflow::action::email::{SmtpEmailHandler, SmtpSettings};
use zapflow::action::telegram::TelegramHandler;
use zapflow::action::{ActionKind, ActionRegistry};
use zapflow::ingest::{IngestService, router};
use zapflow::runtime::{ExecutorConfig, Pipeline, PipelineConfig, RelayConfig};
use zapflow::{PgStore, PgStream};

/// Zapflow - trigger intake and step execution for zaps
#[derive(Parser)]
#[command(name = "zapflow")]
#[command(version, about, long_about = None)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Number of partitions in the stage stream
    #[arg(long, env = "ZAPFLOW_PARTITIONS", default_value_t = 3)]
    partitions: u32,

    /// Prefix for worker ids in logs (default: a fresh UUID)
    #[arg(long, env = "ZAPFLOW_WORKER_ID")]
    worker_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Accept webhook triggers over HTTP
    Serve(ServeArgs),

    /// Relay outbox markers onto the stage stream
    Relay(RelayArgs),

    /// Execute stages from the stream
    Worker(WorkerArgs),

    /// Serve, relay and execute in one process
    All {
        #[command(flatten)]
        serve: ServeArgs,
        #[command(flatten)]
        relay: RelayArgs,
        #[command(flatten)]
        worker: WorkerArgs,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// Address the HTTP server listens on
    #[arg(long, env = "ZAPFLOW_BIND", default_value = "0.0.0.0:3000")]
    bind: String,
}

#[derive(Args)]
struct RelayArgs {
    /// Markers published per relay batch
    #[arg(long, env = "ZAPFLOW_RELAY_BATCH", default_value_t = 3)]
    relay_batch: u32,

    /// Pause between relay batches, in milliseconds
    #[arg(long, env = "ZAPFLOW_RELAY_INTERVAL_MS", default_value_t = 2000)]
    relay_interval_ms: u64,
}

#[derive(Args)]
struct WorkerArgs {
    /// Consumer group whose offsets are committed
    #[arg(long, env = "ZAPFLOW_CONSUMER_GROUP", default_value = "zapflow-executor")]
    consumer_group: String,

    /// Comma-separated partitions this process owns (default: all)
    #[arg(long, env = "ZAPFLOW_OWNED_PARTITIONS", value_delimiter = ',')]
    owned_partitions: Option<Vec<u32>>,

    /// Executor loops to spawn; owned partitions are split between them
    #[arg(long, env = "ZAPFLOW_EXECUTORS", default_value_t = 1)]
    executors: usize,

    /// Fail an action that runs longer than this many seconds
    #[arg(long, env = "ZAPFLOW_HANDLER_TIMEOUT_SECS")]
    handler_timeout_secs: Option<u64>,

    #[command(flatten)]
    smtp: SmtpArgs,

    /// Telegram bot token; enables `sendTelegram` when set
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    telegram_bot_token: Option<String>,
}

/// SMTP settings; `sendEmail` is enabled when host and sender are both set.
#[derive(Args)]
struct SmtpArgs {
    #[arg(long, env = "SMTP_HOST")]
    smtp_host: Option<String>,

    #[arg(long, env = "SMTP_PORT", default_value_t = 587)]
    smtp_port: u16,

    #[arg(long, env = "SMTP_USERNAME")]
    smtp_username: Option<String>,

    #[arg(long, env = "SMTP_PASSWORD", hide_env_values = true)]
    smtp_password: Option<String>,

    #[arg(long, env = "SMTP_FROM")]
    smtp_from: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("zapflow=info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&cli.database_url)
        .await
        .context("failed to connect to database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    match cli.command {
        Command::Serve(serve) => run_server(pool, serve).await,
        Command::Relay(relay) => {
            let config = PipelineConfig {
                relay: relay_config(&relay),
                executor_workers: 0,
                worker_id: cli.worker_id,
                ..Default::default()
            };
            run_pipeline(pool, cli.partitions, ActionRegistry::builder().build()?, config).await;
            Ok(())
        }
        Command::Worker(worker) => {
            let actions = build_actions(&worker)?;
            let config = PipelineConfig {
                executor: executor_config(&worker),
                relay_workers: 0,
                executor_workers: worker.executors,
                worker_id: cli.worker_id,
                ..Default::default()
            };
            run_pipeline(pool, cli.partitions, actions, config).await;
            Ok(())
        }
        Command::All {
            serve,
            relay,
            worker,
        } => {
            let actions = build_actions(&worker)?;
            let config = PipelineConfig {
                relay: relay_config(&relay),
                executor: executor_config(&worker),
                executor_workers: worker.executors,
                worker_id: cli.worker_id,
                ..Default::default()
            };
            let pipeline = run_pipeline(pool.clone(), cli.partitions, actions, config);
            serve_alongside(run_server(pool, serve), pipeline).await
        }
    }
}

async fn run_server(pool: PgPool, args: ServeArgs) -> Result<()> {
    let app = router(IngestService::new(PgStore::new(pool)));

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("failed to bind {}", args.bind))?;
    info!(bind = %args.bind, "Ingestion endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")
}

/// Drive the HTTP server and the pipeline together.
///
/// A server error is returned as soon as it happens, dropping the pipeline.
/// Otherwise both are awaited so each finishes its own graceful shutdown.
async fn serve_alongside<S, P>(server: S, pipeline: P) -> Result<()>
where
    S: Future<Output = Result<()>>,
    P: Future<Output = ()>,
{
    tokio::pin!(server, pipeline);

    tokio::select! {
        result = &mut server => {
            result?;
            pipeline.await;
            Ok(())
        }
        () = &mut pipeline => server.await,
    }
}

async fn run_pipeline(pool: PgPool, partitions: u32, actions: ActionRegistry, config: PipelineConfig) {
    let store = PgStore::new(pool.clone());
    let stream = PgStream::new(pool, partitions);

    Pipeline::new(store, stream, Arc::new(actions), config)
        .run(shutdown_signal())
        .await;
}

fn relay_config(args: &RelayArgs) -> RelayConfig {
    RelayConfig {
        poll_interval: Duration::from_millis(args.relay_interval_ms),
        batch_size: args.relay_batch,
        ..Default::default()
    }
}

fn executor_config(args: &WorkerArgs) -> ExecutorConfig {
    ExecutorConfig {
        consumer_group: args.consumer_group.clone(),
        partitions: args.owned_partitions.clone(),
        ..Default::default()
    }
}

fn build_actions(args: &WorkerArgs) -> Result<ActionRegistry> {
    let mut builder = ActionRegistry::builder();

    if let Some(secs) = args.handler_timeout_secs {
        builder = builder.handler_timeout(Duration::from_secs(secs));
    }

    let smtp = &args.smtp;
    match (&smtp.smtp_host, &smtp.smtp_from) {
        (Some(host), Some(from)) => {
            let settings = SmtpSettings {
                host: host.clone(),
                port: smtp.smtp_port,
                username: smtp.smtp_username.clone(),
                password: smtp.smtp_password.clone(),
                from: from.clone(),
            };
            let handler =
                SmtpEmailHandler::new(&settings).context("failed to configure SMTP transport")?;
            builder = builder.register(ActionKind::SendEmail, handler);
            info!(host = %host, "sendEmail enabled");
        }
        _ => info!("SMTP_HOST or SMTP_FROM not set, sendEmail disabled"),
    }

    match &args.telegram_bot_token {
        Some(token) => {
            let handler = TelegramHandler::new(token.clone())
                .context("failed to configure Telegram client")?;
            builder = builder.register(ActionKind::SendTelegram, handler);
            info!("sendTelegram enabled");
        }
        None => info!("TELEGRAM_BOT_TOKEN not set, sendTelegram disabled"),
    }

    Ok(builder.build()?)
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler available; run until killed.
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_failure_is_returned_while_the_pipeline_runs() {
        let server = async { Err(anyhow::anyhow!("failed to bind 0.0.0.0:3000")) };
        let pipeline = std::future::pending::<()>();

        let result = tokio::time::timeout(Duration::from_secs(1), serve_alongside(server, pipeline))
            .await
            .expect("server failure should not wait for the pipeline");

        assert_eq!(result.unwrap_err().to_string(), "failed to bind 0.0.0.0:3000");
    }

    #[tokio::test]
    async fn clean_shutdown_waits_for_both() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let pipeline = async move {
            let _ = done_tx.send(());
        };
        let server = async move {
            done_rx.await.ok();
            Ok(())
        };

        serve_alongside(server, pipeline).await.unwrap();
    }
}
