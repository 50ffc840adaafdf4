use anyhow::Result;
use kiloclaw_logging::LoggingConfig;
use std::net::SocketAddr;
use tracing::info;

use kiloclaw_api::config::Config;
use kiloclaw_api::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let logging_config = LoggingConfig::from_env("kiloclaw-api")
        .with_level("kiloclaw_api=debug,tower_http=debug,kiloclaw_controller=debug,kiloclaw_logging=info");

    kiloclaw_logging::init_logging(logging_config)?;

    info!(
        service = "kiloclaw-api",
        version = env!("CARGO_PKG_VERSION"),
        "starting kiloclaw API server"
    );

    let config = Config::from_env()?;
    let port = config.port;
    let state = AppState::new(config).await?;
    let app = kiloclaw_api::create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(server.address = %addr, server.port = port, "API server binding to address");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
