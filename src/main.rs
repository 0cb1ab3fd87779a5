use std::time::Duration;

use dotenv::dotenv;
use tracing_subscriber::{EnvFilter, prelude::*};

use profile_diary::app::build_router;
use profile_diary::config::Config;
use profile_diary::storage::ProfileStore;

// Staged uploads older than this belong to a create/update that never finished
const STALE_UPLOAD_AGE: Duration = Duration::from_secs(60 * 60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    let store = ProfileStore::new(config.profiles_dir(), config.staging_dir());
    store.init().await?;
    match store.sweep_staging(STALE_UPLOAD_AGE).await {
        Ok(0) => {}
        Ok(removed) => tracing::info!("🧹 Removed {} stale staged uploads", removed),
        Err(e) => tracing::warn!("Could not sweep staging directory: {}", e),
    }
    tracing::info!("📁 Storing profiles in {:?}", store.root());

    let app = build_router(&config, store);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🚀 Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
