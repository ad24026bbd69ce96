//! HTTP server for the Prometheus metrics endpoint.
//!
//! Runs on its own tokio task, on a separate port from the command
//! listener, and serves `GET /metrics` for scraping.

use axum::{routing::get, Router};
use std::net::SocketAddr;

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

/// Run the HTTP server for the metrics endpoint.
///
/// Binds to `0.0.0.0:port`. Long-running; spawn it in the background. A
/// bind failure is logged and disables the endpoint without taking the
/// command listener down with it.
pub async fn run_http_server(port: u16) {
    let app = Router::new().route("/metrics", get(metrics_handler));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind metrics endpoint");
            return;
        }
    };
    tracing::info!(%addr, "metrics endpoint listening");

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "metrics endpoint error");
    }
}
