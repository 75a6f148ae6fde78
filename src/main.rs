use std::sync::Arc;

use anyhow::{Context, Result};
use opco_contracts::{config::Config, db, routes, AppState, EngineSettings};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "opco_contracts=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading configuration")?;
    tracing::info!(
        bind_addr = %config.bind_addr,
        max_connections = config.database.max_connections,
        include_suspended = config.conflicts_include_suspended,
        "Starting contract service"
    );

    let pool = db::connect(&config.database)
        .await
        .context("connecting to database")?;
    let store = Arc::new(db::PgStore::new(pool));

    let settings = EngineSettings {
        lookup_cache_ttl: config.lookup_cache_ttl,
        lookup_cache_capacity: config.lookup_cache_capacity,
        conflicts_include_suspended: config.conflicts_include_suspended,
    };
    let app = routes::router(AppState::new(store.clone(), store, &settings));

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!("Listening on {}", config.bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
