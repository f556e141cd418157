use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::BufReader;
use tokio::sync::{mpsc, watch};

use session_breakout::config::Config;
use session_breakout::feed::{read_feed, spawn_ingest_worker, FEED_CHANNEL_CAPACITY};
use session_breakout::service::MonitorService;
use session_breakout::store::Store;
use session_breakout::tick_validator::TickValidator;

const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn main() -> Result<()> {
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Set SB_CONFIG_PATH or provide config/default.toml");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .json()
        .init();

    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    let result = runtime.block_on(run(config));
    // A stdin read still parked on the blocking pool must not hold the process.
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    result
}

async fn run(config: Config) -> Result<()> {
    tracing::info!(
        db_path = %config.storage.path,
        timezone = %config.market.timezone,
        symbols = config.symbols.len(),
        sessions = config.sessions.len(),
        "Starting session-breakout"
    );

    let store = Store::open(&config.storage.path, config.storage.busy_timeout())
        .with_context(|| format!("failed to open store at {}", config.storage.path))?;
    let validator = Arc::new(TickValidator::new(
        config.market.trading_window()?,
        config.symbol_registry(),
    ));
    let service = Arc::new(MonitorService::from_config(&config, store.clone())?);
    let status = service.status_handle();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (feed_tx, feed_rx) = mpsc::channel(FEED_CHANNEL_CAPACITY);

    let ingest = spawn_ingest_worker(validator, store, feed_rx);

    let feed_shutdown = shutdown_rx.clone();
    let feed_task = tokio::spawn(async move {
        match std::env::var("SB_FEED_PATH") {
            Ok(path) if !path.trim().is_empty() => {
                tracing::info!(path = %path, "Reading feed from file");
                let file = tokio::fs::File::open(&path)
                    .await
                    .with_context(|| format!("failed to open feed {}", path))?;
                read_feed(BufReader::new(file), feed_tx, feed_shutdown).await
            }
            _ => {
                tracing::info!("Reading feed from stdin");
                read_feed(BufReader::new(tokio::io::stdin()), feed_tx, feed_shutdown).await
            }
        }
    });

    let monitor_task = tokio::spawn(Arc::clone(&service).run(shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;
    tracing::info!("Shutdown requested");
    let _ = shutdown_tx.send(true);

    match feed_task.await {
        Ok(Ok(lines)) => tracing::info!(lines, "Feed reader stopped"),
        Ok(Err(e)) => tracing::warn!(error = %format!("{:#}", e), "Feed reader failed"),
        Err(e) => tracing::warn!(error = %e, "Feed reader task aborted"),
    }
    let stats = ingest.await.context("ingest worker panicked")?;
    monitor_task.await.context("monitor task panicked")??;

    let final_status = status.status();
    tracing::info!(
        accepted = stats.accepted_total(),
        rejected = stats.rejected_total(),
        service_status = final_status.service_status.as_str(),
        "session-breakout stopped"
    );
    Ok(())
}
