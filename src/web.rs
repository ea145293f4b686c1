use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use axum::http::StatusCode;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::services::Services;

const MAX_BODY_BYTES: usize = 64 * 1024;

fn timeout_layer(limit: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, limit)
}

pub fn app(services: Arc<Services>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let request_timeout = Duration::from_secs(services.config.server.request_timeout_seconds);

    Router::new()
        .nest("/api", api::router(services))
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(timeout_layer(request_timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

pub async fn run(services: Arc<Services>) -> anyhow::Result<()> {
    let port = services.config.server.port;
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Web server running at http://localhost:{}", port);

    axum::serve(listener, app(services))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down web server");
        })
        .await
        .context("Web server failed")
}
