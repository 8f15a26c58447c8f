use anyhow::Context;
use dotenvy::dotenv;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use spree_sdk::{AdminStore, MemoryStore, PgStore};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod chain;
mod config;
mod state;

use chain::ChainUnavailable;
use config::Config;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let metrics_handle = install_metrics()?;
    if config.admin_token.is_none() {
        warn!("ADMIN_TOKEN not set; /admin routes will reject every request");
    }

    match config.database_url.as_deref() {
        Some(url) => {
            let store = PgStore::connect(url).await.context("connect to DATABASE_URL")?;
            store.migrate().await.context("apply migrations")?;
            serve(store, &config, metrics_handle).await
        }
        None => {
            warn!("DATABASE_URL not set; using in-memory store, data is lost on restart");
            serve(MemoryStore::new(), &config, metrics_handle).await
        }
    }
}

async fn serve<S: AdminStore + 'static>(
    store: S,
    config: &Config,
    metrics: PrometheusHandle,
) -> anyhow::Result<()> {
    let app = api::router(AppState::new(store, ChainUnavailable, config, metrics));

    let addr = config.addr()?;
    info!("listening on {}", addr);
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn install_metrics() -> anyhow::Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("install metrics recorder")
}
