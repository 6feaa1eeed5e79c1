use std::net::SocketAddr;

use axum::Router;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tower_http::trace::{DefaultOnFailure, DefaultOnResponse};
use tower_http::LatencyUnit;

mod handlers;
pub mod health;

use health::DynDataSource;

const STATUS_PREFIX: &str = "/_status";

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    // log level for http tracing
    pub log_level: tracing::Level,
}

impl Config {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            log_level: tracing::Level::DEBUG,
        }
    }
}

/// `/_status` routes plus the not-found fallback.
pub fn router(data_source: DynDataSource, log_level: tracing::Level) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .on_response(
            DefaultOnResponse::new()
                .include_headers(false)
                .level(log_level)
                .latency_unit(LatencyUnit::Micros),
        )
        .on_failure(DefaultOnFailure::new().latency_unit(LatencyUnit::Micros));

    Router::new()
        .nest(STATUS_PREFIX, health::router(data_source.clone()))
        .fallback(handlers::not_found_handler)
        .with_state(data_source)
        .layer(trace_layer)
}

/// Serve the health endpoints until shutdown is signalled.
pub async fn run(
    config: Config,
    data_source: DynDataSource,
    mut shutdown_rx: watch::Receiver<()>,
) -> Result<(), HttpServerError> {
    let router = router(data_source, config.log_level);

    tracing::info!(addr = ?config.listen_addr, "health server listening");
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        })
        .await?;

    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("an error occurred running the HTTP server: {0}")]
    ServingFailed(#[from] std::io::Error),
}
