use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use stake_indexer::config::Config;
use stake_indexer::db::PgStore;
use stake_indexer::indexer::rpc::RpcPool;
use stake_indexer::pipeline::build_schedulers;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    // Structured logging (set RUST_LOG=info for output, LOG_FORMAT=json for JSON lines)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }

    tracing::info!("Stake indexer starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)?;
    tracing::info!(
        chains = config.chains.len(),
        block_range = config.scan.block_range,
        confirmation_lag = config.scan.confirmation_lag,
        "Configuration loaded from {}",
        config_path
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(|e| eyre::eyre!("Failed to connect to database: {}", e))?;

    tracing::info!("Connected to PostgreSQL");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| eyre::eyre!("Failed to run migrations: {}", e))?;

    tracing::info!("Database migrations complete");

    let store = Arc::new(PgStore::new(pool));
    let rpc = Arc::new(RpcPool::new(&config.chains, config.scan.rpc_retries));
    let (sync, parse) = build_schedulers(store.clone(), rpc, &config);

    let shutdown = CancellationToken::new();
    let mut handles = vec![
        sync.spawn(shutdown.clone()),
        parse.spawn(shutdown.clone()),
    ];

    if config.api.enabled {
        let shutdown = shutdown.clone();
        let host = config.api.host.clone();
        let port = config.api.port;
        handles.push(tokio::spawn(async move {
            if let Err(e) = stake_indexer::api::serve(store, &host, port, shutdown).await {
                tracing::error!(error = %e, "API server failed");
            }
        }));
    }

    tracing::info!("Scan and parse loops started. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, waiting for in-flight cycles...");
    shutdown.cancel();

    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("Stake indexer stopped gracefully");
    Ok(())
}
