use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use suds_station::config::Config;
use suds_station::feed::FeedState;
use suds_station::fleet::seed_fleet;
use suds_station::handlers::AppState;
use suds_station::push::{PushSender, VapidConfig, WebPushSender};
use suds_station::registry::SubscriptionRegistry;
use suds_station::store::{MemoryStore, SubscriptionStore};

#[derive(Parser)]
#[command(name = "suds-station", about = "Laundry status feed and notification dispatcher")]
struct Cli {
    /// Override the listen port from the environment.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO if RUST_LOG is not set.
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }

    let fleet = seed_fleet(&config.fleet_prefix, config.washer_count, config.dryer_count);
    info!(
        machines = fleet.len(),
        prefix = %config.fleet_prefix,
        "seeded fleet"
    );

    let feed = FeedState::new(fleet);
    let store = build_store(&config).await?;
    let sender = build_sender(&config)?;
    let registry = Arc::new(SubscriptionRegistry::new(store, sender));

    let state = AppState { feed, registry };
    let app = suds_station::app(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("suds-station listening on {addr}");

    axum::serve(listener, app)
        .await
        .context("server terminated")?;
    Ok(())
}

fn build_sender(config: &Config) -> anyhow::Result<Arc<dyn PushSender>> {
    let subject = config
        .vapid_subject
        .clone()
        .context("VAPID_SUBJECT is required")?;
    let public_key = config
        .vapid_public_key
        .clone()
        .context("VAPID_PUBLIC_KEY is required")?;
    let private_key_pem = config
        .vapid_private_key_pem
        .clone()
        .context("VAPID_PRIVATE_KEY_PEM is required")?;
    Ok(Arc::new(WebPushSender::new(
        VapidConfig {
            subject,
            public_key,
            private_key_pem,
        },
        config.push_ttl_seconds,
    )))
}

#[cfg(feature = "redis-store")]
async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn SubscriptionStore>> {
    use suds_station::store::RedisStore;

    match config.redis_url.as_deref() {
        Some(url) => {
            info!("using redis subscription store");
            let store = RedisStore::new(url)
                .await
                .context("failed to connect to redis")?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(MemoryStore::new())),
    }
}

#[cfg(not(feature = "redis-store"))]
async fn build_store(_config: &Config) -> anyhow::Result<Arc<dyn SubscriptionStore>> {
    Ok(Arc::new(MemoryStore::new()))
}
