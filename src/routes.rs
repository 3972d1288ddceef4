// routes.rs
use axum::{
    body::Body,
    extract::State,
    http::HeaderMap,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::Utc;
use std::sync::Arc;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::{
    config::Config,
    error::WebhookError,
    webhook::{WebhookEndpoint, WebhookOutcome},
};

#[derive(Debug)]
pub struct AppState {
    pub endpoint: WebhookEndpoint,
}

pub fn router(config: &Config, state: Arc<AppState>) -> Router {
    let app = Router::new()
        .route(&config.webhook_path, post(handle_webhook))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TimeoutLayer::new(config.request_timeout()));

    if config.enable_request_logging {
        app.layer(TraceLayer::new_for_http())
    } else {
        app
    }
}

async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Body,
) -> Result<WebhookOutcome, WebhookError> {
    state.endpoint.handle(&headers, body).await
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now()
    }))
}
