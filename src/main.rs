use anyhow::{Context, Result};

use botpanel_channel::config::{Config, LogFormat};
use botpanel_channel::provider::{Provider, ProviderOptions};
use botpanel_channel::server;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.log_level.parse().unwrap_or_default());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
    }

    let port = config.http_port;

    tracing::info!(
        backend = %config.backend_url,
        accounts_poll_ms = config.accounts_poll_ms,
        status_poll_ms = config.status_poll_ms,
        port,
        "botpanel starting"
    );

    let provider = Provider::open(&config.backend_url, ProviderOptions::from_config(&config))
        .with_context(|| format!("cannot open backend channel to {}", config.backend_url))?;

    let router = server::build_router(server::AppState::from_provider(&provider));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!("HTTP server listening on 0.0.0.0:{port}");

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    provider.close().await;
    tracing::info!("backend channel released");

    served?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
