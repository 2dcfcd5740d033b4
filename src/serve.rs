use crate::config::ServeConfig;
use crate::metrics::MetricStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Content type of the Prometheus text exposition format.
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[cfg(feature = "serve")]
#[derive(Clone)]
struct AppState {
    store: Arc<MetricStore>,
}

/// Errors from running the HTTP exposition endpoint.
#[derive(Debug)]
pub enum ServeError {
    Bind {
        addr: String,
        source: std::io::Error,
    },
    Io {
        source: std::io::Error,
    },
}

impl std::fmt::Display for ServeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServeError::Bind { addr, source } => write!(f, "failed to bind {}: {}", addr, source),
            ServeError::Io { source } => write!(f, "metrics server error: {}", source),
        }
    }
}

impl std::error::Error for ServeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServeError::Bind { source, .. } => Some(source),
            ServeError::Io { source } => Some(source),
        }
    }
}

#[cfg(feature = "serve")]
pub fn router(store: Arc<MetricStore>) -> axum::Router {
    use axum::{response::Redirect, routing::get, Router};
    use tower_http::cors::CorsLayer;

    let state = AppState { store };
    Router::new()
        .route("/", get(|| async { Redirect::to("/metrics") }))
        .route("/metrics", get(metrics))
        .route("/api/health", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Serve the metrics endpoint until `cancel` fires.
#[cfg(feature = "serve")]
pub async fn run(
    config: &ServeConfig,
    store: Arc<MetricStore>,
    cancel: CancellationToken,
) -> Result<(), ServeError> {
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| ServeError::Bind {
            addr: addr.clone(),
            source: e,
        })?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| ServeError::Io { source: e })?;
    tracing::info!("serving metrics on http://{local_addr}/metrics");

    axum::serve(listener, router(store))
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await
        .map_err(|e| ServeError::Io { source: e })
}

/// Without the `serve` feature there is no exposition endpoint; wait for shutdown.
#[cfg(not(feature = "serve"))]
pub async fn run(
    config: &ServeConfig,
    _store: Arc<MetricStore>,
    cancel: CancellationToken,
) -> Result<(), ServeError> {
    tracing::warn!(
        port = config.port,
        "built without the serve feature, metrics are not exposed"
    );
    cancel.cancelled().await;
    Ok(())
}

#[cfg(feature = "serve")]
async fn metrics(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> impl axum::response::IntoResponse {
    let body = state.store.render().await;
    ([(axum::http::header::CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)], body)
}

#[cfg(feature = "serve")]
async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"ok": true}))
}
