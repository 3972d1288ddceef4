use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use eventsub_gateway::{
    commands::{ChatCommandHandler, CHANNEL_CHAT_MESSAGE_V1},
    config::Config,
    dispatch::RouteTable,
    routes::{self, AppState},
    webhook::WebhookEndpoint,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let route_table = RouteTable::builder()
        .route(
            CHANNEL_CHAT_MESSAGE_V1,
            ChatCommandHandler::new(&config.chat_command_prefix)?,
        )
        .build();
    info!(routes = ?route_table, "registered notification routes");

    let state = Arc::new(AppState {
        endpoint: WebhookEndpoint::from_config(&config, route_table),
    });

    let app = routes::router(&config, Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    info!(
        bind_address = %config.bind_address,
        webhook_path = %config.webhook_path,
        "Server starting"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let dispatcher = state.endpoint.dispatcher();
    if !dispatcher.drain(config.shutdown_timeout()).await {
        warn!(
            in_flight = dispatcher.in_flight(),
            "shutdown timeout reached with handlers still running"
        );
    }
    info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
