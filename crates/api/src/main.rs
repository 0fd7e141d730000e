use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use libris_api::app;
use libris_api::config::AppConfig;
use libris_api::context::AppContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    libris_observability::init();

    let config = AppConfig::from_env();
    let ctx = app::services::build_context(&config).await?;
    spawn_revocation_sweeper(ctx.clone());
    let router = app::build_app(ctx);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;
    Ok(())
}

/// Hourly cleanup of revocation entries whose tokens have expired anyway.
/// The first pass runs at startup to clear anything left from earlier runs.
fn spawn_revocation_sweeper(ctx: Arc<AppContext>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(3600));
        loop {
            tick.tick().await;
            match ctx.store.purge_expired(ctx.clock.now()).await {
                Ok(0) => {}
                Ok(count) => tracing::debug!(count, "purged expired revocation entries"),
                Err(err) => tracing::warn!(error = %err, "revocation purge failed"),
            }
        }
    });
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to install shutdown handler");
        return;
    }
    tracing::info!("shutdown signal received");
}
