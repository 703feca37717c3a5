mod api;
mod config;

use clap::Parser;
use resolver::local_cache::LocalCache;
use resolver::resolve::Resolver;
use resolver::shared_cache::{RedisCache, SharedCache, SharedCacheError};
use resolver::store::{RouteStore, SqlRouteStore, StoreError};
use resolver::sync::SyncTask;
use shared::metrics::{MetricError, Metrics};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(about = "Tiered route-resolution service")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum RunError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("shared cache: {0}")]
    SharedCache(#[from] SharedCacheError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("metrics: {0}")]
    Metrics(#[from] MetricError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "startup failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), RunError> {
    let config = config::Config::from_file(&cli.config)?;

    let metrics = match &config.metrics {
        Some(m) => Metrics::new(&m.statsd_host, m.statsd_port, "switchboard")?,
        None => Metrics::new_noop(),
    };

    let redis = Arc::new(RedisCache::new(&config.redis)?);
    redis.ping().await?;
    redis.warm(config.redis.min_idle).await?;
    tracing::info!(url = %config.redis.url, "connected to redis");

    let local = LocalCache::new(
        config.local_cache.max_size,
        Duration::from_secs(config.local_cache.ttl_secs),
    );
    let store = Arc::new(SqlRouteStore::from_projects(&config.projects)?);

    let resolver = Resolver::new(
        local.clone(),
        redis.clone() as Arc<dyn SharedCache>,
        store.clone() as Arc<dyn RouteStore>,
        metrics.clone(),
    );

    let sync = if config.sync.enabled {
        tracing::info!(
            interval_secs = config.sync.interval_secs,
            batch_size = config.sync.batch_size,
            "starting sync worker"
        );
        Some(
            SyncTask::new(
                store,
                redis.clone() as Arc<dyn SharedCache>,
                config.sync.batch_size,
                metrics,
            )
            .start(Duration::from_secs(config.sync.interval_secs)),
        )
    } else {
        None
    };

    let app = api::router(api::AppState { resolver, redis });

    let addr = format!("{}:{}", config.listener.host, config.listener.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("shutting down");
    if let Some(sync) = sync {
        sync.shutdown().await;
    }
    local.close();

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
