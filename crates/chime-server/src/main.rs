//! # Chime Server
//!
//! Pusher-compatible channels relay.
//!
//! ## Usage
//!
//! ```bash
//! # Create the schema, then serve
//! chime --migrate
//!
//! # Run with custom config
//! chime --config /path/to/chime.toml
//!
//! # Run with environment overrides
//! CHIME__PORT=8080 CHIME__CACHE__REDIS_URL=redis://127.0.0.1/ chime
//! ```

use anyhow::{Context, Result};
use chime_core::{
    CacheBackend, ConnectionRegistry, CredentialCache, Dispatcher, DispatcherConfig, MemoryCache,
    RegistryConfig, TracingLogSink,
};
use chime_server::cache::RedisCache;
use chime_server::config::Config;
use chime_server::storage::SqliteStore;
use chime_server::webhook::WebhookDispatcher;
use chime_server::{handlers, metrics, AppState};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "chime", version, about)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Create the database schema before serving.
    #[arg(long)]
    migrate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    info!("Starting Chime server on {}:{}", config.host, config.port);

    metrics::init_metrics();
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            warn!(error = %e, "Failed to start metrics server");
        }
    }

    let store = SqliteStore::open(&config.storage.database_path)
        .with_context(|| format!("Failed to open database {}", config.storage.database_path))?;
    if cli.migrate {
        store.migrate().context("Migration failed")?;
    }

    let cache: Arc<dyn CacheBackend> = match &config.cache.redis_url {
        Some(url) => Arc::new(
            RedisCache::connect(url)
                .await
                .context("Redis connection failed")?,
        ),
        None => {
            info!("No Redis URL configured, using in-process credential cache");
            let cache = Arc::new(MemoryCache::new());
            tokio::spawn(sweep_expired(Arc::clone(&cache), config.cache.ttl()));
            cache
        }
    };

    // Warm the cache so the first handshakes skip the store.
    let ttl = config.cache.ttl();
    let credentials = store
        .load_credentials()
        .context("Failed to load apps (run with --migrate to create the schema)")?;
    for credential in &credentials {
        if let Err(e) = cache.put(&credential.app_key, credential, ttl).await {
            warn!(app_id = %credential.app_id, error = %e, "Failed to warm credential cache");
        }
    }
    info!(apps = credentials.len(), "Loaded application credentials");

    let webhooks = WebhookDispatcher::spawn(
        store.load_webhooks().context("Failed to load webhooks")?,
        &config.webhooks,
    )
    .context("Failed to build webhook client")?;
    info!(
        registrations = webhooks.registration_count(),
        "Loaded webhook registrations"
    );

    let registry = Arc::new(ConnectionRegistry::with_config(RegistryConfig {
        max_subscriptions_per_connection: config.limits.max_subscriptions_per_connection,
    }));
    let dispatcher = Arc::new(Dispatcher::with_config(
        registry,
        Arc::new(webhooks),
        Arc::new(TracingLogSink),
        DispatcherConfig {
            outbound_buffer: config.limits.outbound_buffer,
            ..DispatcherConfig::default()
        },
    ));
    let resolver = Arc::new(CredentialCache::with_ttl(Arc::new(store), cache, ttl));

    handlers::run_server(Arc::new(AppState::new(dispatcher, resolver, config))).await?;

    Ok(())
}

/// Drop expired entries from the in-process cache once per TTL.
async fn sweep_expired(cache: Arc<MemoryCache>, every: Duration) {
    let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
    interval.tick().await;
    loop {
        interval.tick().await;
        let removed = cache.purge_expired();
        tracing::debug!(removed, "Swept expired credentials");
    }
}
