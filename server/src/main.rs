use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use chorus_server::config::{ServerConfig, StorageBackend};
use chorus_server::db::pool::{create_pool, run_migrations};
use chorus_server::db::sqlite_storage::SqliteStorage;
use chorus_server::engine::channel_service::ChannelService;
use chorus_server::engine::memory_storage::MemoryStorage;
use chorus_server::engine::presence::PresenceTracker;
use chorus_server::engine::storage::Storage;
use chorus_server::web::app_state::AppState;
use chorus_server::web::router::build_router;

/// Chorus channel message service.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "chorus.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config)?;

    let storage: Arc<dyn Storage> = match config.database.backend {
        StorageBackend::Sqlite => {
            let pool = create_pool(&config.database.url)
                .await
                .context("failed to connect to database")?;
            run_migrations(&pool)
                .await
                .context("failed to run database migrations")?;
            Arc::new(SqliteStorage::new(pool))
        }
        StorageBackend::Memory => {
            info!("using in-memory storage; nothing will be persisted");
            Arc::new(MemoryStorage::new())
        }
    };

    let service = Arc::new(ChannelService::with_storage(
        storage,
        config.retry_policy(),
        config.service_limits(),
    ));
    service
        .load()
        .await
        .context("failed to load servers and channels")?;

    let shutdown = CancellationToken::new();
    let app_state = Arc::new(AppState {
        service,
        presence: Arc::new(PresenceTracker::new()),
        outbound_queue: config.limits.outbound_queue,
        shutdown: shutdown.clone(),
    });

    let app = build_router(app_state);

    let web_addr = &config.server.web_address;
    let listener = tokio::net::TcpListener::bind(web_addr)
        .await
        .with_context(|| format!("failed to bind web listener on {web_addr}"))?;

    info!("Chorus server starting on {}", web_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, closing connections");
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    info!("Chorus server stopped");
    Ok(())
}
