//! HTTP server wiring for the monitor daemon.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::Router;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::routes;
use crate::store::HeartbeatStore;

/// Published view of the decision engine, refreshed after every tick.
#[derive(Debug, Clone)]
pub struct EngineView {
    pub fallback_active: bool,
    pub last_decision: String,
    pub decided_at: DateTime<Utc>,
}

impl Default for EngineView {
    fn default() -> Self {
        Self {
            fallback_active: false,
            last_decision: "startup".into(),
            decided_at: Utc::now(),
        }
    }
}

/// State shared across handlers.
pub struct AppState {
    pub store: Arc<HeartbeatStore>,
    pub engine: Arc<RwLock<EngineView>>,
    pub token: Option<String>,
    pub require_token: bool,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<HeartbeatStore>,
        engine: Arc<RwLock<EngineView>>,
        token: Option<String>,
        require_token: bool,
    ) -> Self {
        Self {
            store,
            engine,
            token,
            require_token,
            started_at: Instant::now(),
        }
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::status_routes())
        .merge(routes::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP server until the token is cancelled, then drain in-flight
/// requests.
pub async fn run(state: Arc<AppState>, bind: &str, port: u16, cancel: CancellationToken) -> Result<()> {
    let app = router(state);

    let addr = format!("{bind}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("listening on http://{addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { cancel.cancelled().await })
    .await
    .context("http server terminated")?;

    Ok(())
}
