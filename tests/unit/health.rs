//! Unit tests for the probe and metrics endpoints

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use mysql_operator::health::{HealthState, create_router};
use tower::ServiceExt;

async fn get(state: Arc<HealthState>, uri: &str) -> (StatusCode, String) {
    let response = create_router(state)
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn test_liveness_always_ok() {
    let (status, body) = get(Arc::new(HealthState::new()), "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_readiness_follows_flag() {
    let state = Arc::new(HealthState::new());

    let (status, _) = get(state.clone(), "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    state.set_ready(true).await;
    let (status, body) = get(state, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ready");
}

#[tokio::test]
async fn test_metrics_exposes_database_series() {
    let state = Arc::new(HealthState::new());
    state.metrics.set_database_replicas("prod", "orders", 3, 1);

    let (status, body) = get(state, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("mysql_operator_database_replicas_desired"));
    assert!(body.contains("namespace=\"prod\""));
    assert!(body.contains("name=\"orders\""));
}
