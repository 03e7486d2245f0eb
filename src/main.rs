use anyhow::Context;
use notesync::bootstrap;
use notesync::config::Config;
use notesync::infrastructure::observability;
use notesync::infrastructure::persistence::Database;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    let _observability = observability::init(&config)
        .map_err(|e| anyhow::anyhow!("failed to initialise observability: {}", e))?;
    tracing::info!("Configuration loaded");

    // Initialize database connection
    let db = Database::connect(&config.database_url)
        .await
        .context("failed to connect to database")?;
    tracing::info!("Database connection established");

    // Run migrations
    db.run_migrations().await.context("failed to run migrations")?;
    tracing::info!("Database migrations applied");

    let runtime = bootstrap::build_sync_runtime(db, &config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to build sync runtime: {}", e))?;

    for stats in runtime.admin.all_stats().await? {
        tracing::info!(
            service = %stats.service,
            pending = stats.pending,
            delayed = stats.delayed,
            processing = stats.processing,
            failed = stats.failed,
            "Queue state at startup"
        );
    }

    let cancel = CancellationToken::new();
    let processor = runtime.start(cancel.clone());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested, waiting for sync loops to stop");
    cancel.cancel();

    processor.await.context("sync processor task panicked")?;
    tracing::info!("Sync worker stopped");
    Ok(())
}
