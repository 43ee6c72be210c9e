//! Integration tests for the monitor's HTTP surface.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tower::ServiceExt;
use vigild::routes::MAX_BODY_BYTES;
use vigild::server::{router, AppState, EngineView};
use vigild::store::HeartbeatStore;

fn test_router(token: Option<&str>) -> Router {
    let store = Arc::new(HeartbeatStore::new(Duration::from_secs(300), 32));
    let engine = Arc::new(RwLock::new(EngineView::default()));
    let state = Arc::new(AppState::new(
        store,
        engine,
        token.map(str::to_string),
        token.is_some(),
    ));
    router(state)
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    let request = match body {
        Some(payload) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&payload).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn posted_report_appears_in_snapshot() {
    let router = test_router(None);

    let (status, ack) = send(
        &router,
        Method::POST,
        "/status",
        None,
        Some(json!({
            "reportedAt": "2024-11-02T10:00:00Z",
            "streamingActive": true,
            "cameraSignalAvailable": true,
            "machineId": "PRIMARY-01",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["ok"], json!(true));
    assert!(ack["receivedAt"].is_string());

    let (status, snapshot) = send(&router, Method::GET, "/status", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(snapshot["fallbackActive"], json!(false));
    assert_eq!(snapshot["lastDecision"], json!("startup"));

    let records = snapshot["records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["streamingActive"], json!(true));
    // Opaque extras survive the round trip.
    assert_eq!(records[0]["machineId"], json!("PRIMARY-01"));
    assert_eq!(records[0]["sourceAddress"], json!("unknown"));
}

#[tokio::test]
async fn malformed_json_is_rejected_with_400() {
    let router = test_router(None);

    let request = Request::builder()
        .method(Method::POST)
        .uri("/status")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Nothing was stored.
    let (_, snapshot) = send(&router, Method::GET, "/status", None, None).await;
    assert!(snapshot["records"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn oversized_body_is_rejected_with_413() {
    let router = test_router(None);

    let big = "x".repeat(MAX_BODY_BYTES + 1);
    let request = Request::builder()
        .method(Method::POST)
        .uri("/status")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(big))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn missing_or_wrong_token_yields_401_and_no_state_change() {
    let router = test_router(Some("hunter2"));

    let payload = json!({"streamingActive": true});

    let (status, _) = send(&router, Method::POST, "/status", None, Some(payload.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(
        &router,
        Method::POST,
        "/status",
        Some("wrong"),
        Some(payload.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // The store is untouched by rejected requests.
    let (status, snapshot) = send(&router, Method::GET, "/status", Some("hunter2"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(snapshot["records"].as_array().unwrap().is_empty());

    // The right token goes through.
    let (status, _) = send(
        &router,
        Method::POST,
        "/status",
        Some("hunter2"),
        Some(payload),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn healthz_is_open_even_with_auth_enabled() {
    let router = test_router(Some("hunter2"));

    let (status, body) = send(&router, Method::GET, "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
}

#[tokio::test]
async fn ack_reports_seconds_since_previous_heartbeat() {
    let router = test_router(None);
    let payload = json!({"streamingActive": true});

    let (_, first) = send(&router, Method::POST, "/status", None, Some(payload.clone())).await;
    assert_eq!(first["secondsSinceLastHeartbeat"], json!(0.0));

    let (_, second) = send(&router, Method::POST, "/status", None, Some(payload)).await;
    let gap = second["secondsSinceLastHeartbeat"].as_f64().unwrap();
    assert!(gap >= 0.0 && gap < 5.0, "implausible gap: {gap}");
}
