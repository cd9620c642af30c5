//! Driftchat signaling server — main entry point.

use anyhow::Result;
use tracing::info;

use driftchat_server::api::{create_router, AppState};
use driftchat_server::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "driftchat_server=debug,tower_http=debug".into()),
        )
        .json()
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting driftchat signaling server"
    );

    let bind_address = config.bind_address.clone();
    let state = AppState::new(config);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    info!(address = %bind_address, "listening");

    let shutdown_signal = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
        info!("received shutdown signal, cleaning up...");
    };

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal).await?;

    info!("server shutdown complete");
    Ok(())
}
