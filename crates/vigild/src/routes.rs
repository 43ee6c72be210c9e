//! API routes for the monitor daemon.
//!
//! Two real routes (`POST /status`, `GET /status`) plus a `/healthz`
//! liveness check. The POST body is read raw so the failure modes stay
//! exact: 413 for oversized bodies, 400 for undecodable JSON, 401 for a
//! bad token. Storage problems never kill the process; the store logs and
//! stays in memory.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};
use vigil_common::{HeartbeatAck, HeartbeatReport, MonitorSnapshot};

use crate::server::AppState;

type AppStateArc = Arc<AppState>;

/// Largest accepted heartbeat body. Reports are a few hundred bytes; 64 KiB
/// leaves generous room for diagnostic extras.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<ErrorBody>) {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
}

pub fn status_routes() -> Router<AppStateArc> {
    Router::new()
        .route("/status", post(post_status))
        .route("/status", get(get_status))
}

pub fn health_routes() -> Router<AppStateArc> {
    Router::new().route("/healthz", get(healthz))
}

fn authenticate(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<(), (StatusCode, Json<ErrorBody>)> {
    // A configured token is always enforced; `require_token` only matters
    // when no token is set (it then rejects everything, which beats running
    // open by accident).
    let Some(expected) = state.token.as_deref() else {
        if state.require_token {
            return Err(error_response(
                StatusCode::UNAUTHORIZED,
                "bearer token required but none is configured",
            ));
        }
        return Ok(());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    match provided {
        Some(candidate) if candidate == expected => Ok(()),
        _ => Err(error_response(
            StatusCode::UNAUTHORIZED,
            "missing or invalid bearer token",
        )),
    }
}

async fn post_status(
    State(state): State<AppStateArc>,
    request: Request,
) -> Result<Json<HeartbeatAck>, (StatusCode, Json<ErrorBody>)> {
    authenticate(&state, request.headers())?;

    // Reject declared-oversize bodies before reading anything.
    if let Some(length) = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
    {
        if length > MAX_BODY_BYTES {
            return Err(error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("body exceeds {MAX_BODY_BYTES} bytes"),
            ));
        }
    }

    let source_address = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.to_string())
        .unwrap_or_else(|| "unknown".into());

    let body = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|_| {
            error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("body exceeds {MAX_BODY_BYTES} bytes"),
            )
        })?;

    let report: HeartbeatReport = serde_json::from_slice(&body).map_err(|err| {
        warn!("rejected malformed heartbeat from {source_address}: {err}");
        error_response(StatusCode::BAD_REQUEST, format!("invalid JSON: {err}"))
    })?;

    let previous = state.store.latest().await;
    let record = state.store.append(report, source_address).await;
    debug!("heartbeat #{} from {}", record.seq, record.source_address);

    let seconds_since_last = previous
        .map(|p| p.age(Instant::now()).as_secs_f64())
        .unwrap_or(0.0);

    let engine = state.engine.read().await;
    Ok(Json(HeartbeatAck {
        ok: true,
        received_at: record.received_at,
        fallback_active: engine.fallback_active,
        seconds_since_last_heartbeat: seconds_since_last,
    }))
}

async fn get_status(
    State(state): State<AppStateArc>,
    headers: HeaderMap,
) -> Result<Json<MonitorSnapshot>, (StatusCode, Json<ErrorBody>)> {
    authenticate(&state, &headers)?;

    let records = state.store.snapshot().await;
    let engine = state.engine.read().await;

    Ok(Json(MonitorSnapshot {
        records,
        fallback_active: engine.fallback_active,
        last_decision: engine.last_decision.clone(),
        decided_at: engine.decided_at,
    }))
}

async fn healthz(State(state): State<AppStateArc>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "serverTime": Utc::now(),
        "uptimeSeconds": state.started_at.elapsed().as_secs(),
    }))
}
