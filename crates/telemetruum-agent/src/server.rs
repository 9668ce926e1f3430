//! Scrape endpoint.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use telemetruum_core::metrics::{CONTENT_TYPE, PrometheusBackend};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub fn router(backend: Arc<PrometheusBackend>) -> Router {
    Router::new()
        .route("/metrics", get(handle_metrics))
        .route("/health", get(handle_health))
        .with_state(backend)
}

/// Serves until `token` is cancelled, then drains open connections.
pub async fn serve(
    listener: TcpListener,
    backend: Arc<PrometheusBackend>,
    token: CancellationToken,
) -> std::io::Result<()> {
    axum::serve(listener, router(backend))
        .with_graceful_shutdown(async move { token.cancelled().await })
        .await
}

async fn handle_metrics(State(backend): State<Arc<PrometheusBackend>>) -> Response {
    match backend.encode() {
        Ok(body) => {
            debug!(bytes = body.len(), "metrics scraped");
            ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
        }
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn handle_health() -> &'static str {
    "ok"
}
