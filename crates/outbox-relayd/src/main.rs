//! Outbox relay daemon entry point.
//!
//! Usage: outbox-relayd --database <path> --endpoint <url>
//!                      --message-type <TYPE> [--message-type <TYPE> ...]
//!
//! Claims committed outbox messages from the SQLite database and forwards
//! them to the HTTP endpoint. Message types without a --message-type flag
//! are marked failed when encountered.

use clap::Parser;
use outbox_relay::{Handler, HandlerRegistry, HttpForwarder, OutboxProcessor, RelayConfig};
use outbox_store::AsyncOutboxStore;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Relay daemon forwarding outbox messages to an HTTP endpoint.
#[derive(Parser, Debug)]
#[command(name = "outbox-relayd")]
#[command(about = "Relay daemon that forwards outbox messages to an HTTP endpoint")]
struct Args {
    /// Path to the SQLite database holding the outbox table.
    #[arg(long, env = "OUTBOX_DB")]
    database: PathBuf,

    /// URL messages are POSTed to.
    #[arg(long, env = "OUTBOX_ENDPOINT")]
    endpoint: String,

    /// Bearer token attached to every forwarded request.
    #[arg(long, env = "OUTBOX_BEARER_TOKEN", hide_env_values = true)]
    bearer_token: Option<String>,

    /// Message type to forward. Repeat the flag for each type.
    #[arg(long = "message-type", required = true)]
    message_types: Vec<String>,

    /// Poll interval between delivery cycles, in milliseconds.
    #[arg(long, env = "OUTBOX_POLL_INTERVAL_MS", default_value = "1000")]
    poll_interval_ms: u64,

    /// Maximum rows claimed per cycle.
    #[arg(long, env = "OUTBOX_BATCH_SIZE", default_value = "50")]
    batch_size: usize,

    /// Delivery attempts before a message is parked as failed.
    #[arg(long, env = "OUTBOX_MAX_ATTEMPTS", default_value = "5")]
    max_attempts: i32,

    /// Seconds before an unfinished claim is considered abandoned.
    #[arg(long, env = "OUTBOX_STALE_THRESHOLD_SECS", default_value = "300")]
    stale_threshold_secs: u64,

    /// Seconds a single delivery attempt may run.
    #[arg(long, env = "OUTBOX_HANDLER_TIMEOUT_SECS", default_value = "30")]
    handler_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines instead of human-readable text.
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            batch_size: self.batch_size,
            max_attempts: self.max_attempts,
            stale_threshold: Duration::from_secs(self.stale_threshold_secs),
            handler_timeout: Duration::from_secs(self.handler_timeout_secs),
        }
    }
}

fn init_logging(default_level: &str, json: bool) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if json {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(io::stderr)
                    .with_filter(env_filter),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .compact()
                    .with_writer(io::stderr)
                    .with_ansi(true)
                    .with_filter(env_filter),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs);

    info!("outbox-relayd starting...");

    let config = args.relay_config();
    let store = AsyncOutboxStore::open(&args.database).await?;
    store.health_check().await?;

    info!(
        database = %store.path(),
        endpoint = %args.endpoint,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        batch_size = config.batch_size,
        max_attempts = config.max_attempts,
        stale_threshold_secs = config.stale_threshold.as_secs(),
        handler_timeout_secs = config.handler_timeout.as_secs(),
        "Configuration loaded"
    );

    let mut forwarder = HttpForwarder::new(&args.endpoint, config.handler_timeout);
    if let Some(token) = &args.bearer_token {
        forwarder = forwarder.with_bearer_token(token);
    }
    let forwarder: Arc<dyn Handler> = Arc::new(forwarder);

    let mut registry = HandlerRegistry::new();
    for message_type in &args.message_types {
        registry.register(message_type, Arc::clone(&forwarder));
    }
    info!(
        message_types = ?registry.message_types(),
        "Forwarding handlers registered"
    );

    let processor = OutboxProcessor::new(store.clone(), registry, config)?;
    processor.start()?;
    info!("Relay running");

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, draining...");

    processor.stop().await;
    store.close().await?;
    info!("Shutdown complete");

    Ok(())
}
