use clap::Parser;
use dotenvy::dotenv;
use rust_upload_engine::config::StorageConfig;
use rust_upload_engine::infrastructure::storage::build_engine;
use rust_upload_engine::services::worker::PurgeWorker;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Purges stale uploads and orphaned payloads.
#[derive(Parser, Debug)]
#[command(name = "upload-janitor", version, about)]
struct Cli {
    /// Run a single purge and exit
    #[arg(long)]
    once: bool,

    /// Idle threshold in seconds; defaults to the configured expiry
    #[arg(long)]
    max_age_secs: Option<u64>,

    /// Seconds between purge runs; defaults to the configured interval
    #[arg(long)]
    interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_upload_engine=info,upload_janitor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    info!("🚀 Starting upload janitor...");

    let config = StorageConfig::from_env();
    info!(
        "🛡️  Storage Config: Backend={}, Dir={}, Max Size={}MB, Expiry={:?}",
        config.backend.as_str(),
        config.directory.display(),
        config.max_upload_size / 1024 / 1024,
        config.expiration.as_ref().map(|e| e.max_age)
    );

    let interval = cli
        .interval_secs
        .map(Duration::from_secs)
        .or_else(|| config.expiration.as_ref().map(|e| e.purge_interval))
        .unwrap_or(Duration::from_secs(3600));
    let engine = Arc::new(build_engine(config).await?);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut worker = PurgeWorker::new(engine, interval, shutdown_rx);
    if let Some(secs) = cli.max_age_secs {
        worker = worker.with_max_age(Duration::from_secs(secs));
    }

    if cli.once {
        let result = worker.run_once().await?;
        info!(
            "✅ Purged {} uploads and {} orphans ({} examined, {} skipped)",
            result.items.len(),
            result.orphans.len(),
            result.attempted,
            result.skipped
        );
        return Ok(());
    }

    let handle = tokio::spawn(worker.run());
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
    handle.await?;

    info!("🛑 Janitor shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("⌨️  Ctrl+C received, starting graceful shutdown...");
        },
        _ = terminate => {
            info!("💤 SIGTERM received, starting graceful shutdown...");
        },
    }
}
