//! HTTP pull listener.
//!
//! - `/metrics` : Prometheus text format, observed at request time
//! - `/healthz` : liveness

use crate::exporter::PrometheusExporter;
use crate::output::prometheus::CONTENT_TYPE;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

pub async fn metrics(State(exporter): State<Arc<PrometheusExporter>>) -> Response {
    let body = exporter.render();
    (StatusCode::OK, [(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response()
}

pub fn router(exporter: Arc<PrometheusExporter>) -> Router {
    Router::new()
        .route("/metrics", get(metrics))
        .route("/healthz", get(healthz))
        .with_state(exporter)
}

/// Serve the exporter on `listener` until `shutdown` resolves.
pub async fn serve<F>(
    listener: TcpListener,
    exporter: Arc<PrometheusExporter>,
    shutdown: F,
) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "serving metrics");
    }
    axum::serve(listener, router(exporter))
        .with_graceful_shutdown(shutdown)
        .await
}
