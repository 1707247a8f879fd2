//! Metrics HTTP server.

use crate::MetricsRegistry;
use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, TextEncoder};
use std::net::{SocketAddr, TcpListener};
use tower_http::trace::TraceLayer;

/// Metrics server
pub struct MetricsServer {
    registry: MetricsRegistry,
    listener: TcpListener,
}

impl MetricsServer {
    /// Bind the listen socket up front so an occupied port fails startup
    /// instead of surfacing later from a background task.
    pub fn bind(registry: MetricsRegistry, port: u16) -> Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr)
            .with_context(|| format!("failed to bind metrics server on {addr}"))?;
        listener
            .set_nonblocking(true)
            .context("failed to configure metrics listener")?;
        tracing::info!("Metrics server listening on {}", addr);

        Ok(Self { registry, listener })
    }

    /// Run the metrics server
    pub async fn run(self) -> Result<()> {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/health", get(health_handler))
            .route("/ready", get(ready_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(self.registry);

        axum::Server::from_tcp(self.listener)
            .context("failed to start metrics server")?
            .serve(app.into_make_service())
            .await?;

        Ok(())
    }
}

/// Metrics endpoint handler
async fn metrics_handler(State(registry): State<MetricsRegistry>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = registry.registry().gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (StatusCode::OK, buffer),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, Vec::new())
        }
    }
}

/// Health check handler
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check handler
async fn ready_handler() -> impl IntoResponse {
    (StatusCode::OK, "Ready")
}
