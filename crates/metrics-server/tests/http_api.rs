//! End-to-end exercise of the HTTP ingress over the in-memory backend,
//! driven directly against the axum `Router` the way
//! `control-plane-api`'s integration tests drive their service under test.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use metrics_server::ingress::{http, AppState};
use metrics_server::middleware::Pipeline;
use metrics_server::storage::memory::MemoryStorage;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

fn test_app() -> axum::Router {
    let state = AppState {
        storage: Arc::new(MemoryStorage::new()),
        pipeline: Pipeline::new(None, None, None),
        shutdown: CancellationToken::new(),
        hmac_key: None,
    };
    http::router(state)
}

#[tokio::test]
async fn update_then_read_back_via_path() {
    let app = test_app();

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/update/counter/hits/5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(Request::builder().uri("/value/counter/hits").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"5");
}

#[tokio::test]
async fn unknown_metric_is_not_found() {
    let app = test_app();
    let response = app.oneshot(Request::builder().uri("/value/gauge/missing").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_kind_is_rejected() {
    let app = test_app();
    let response = app
        .oneshot(Request::builder().method("POST").uri("/update/bogus/x/1").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn updates_batch_accepts_json_array() {
    let app = test_app();
    let batch_json = r#"[{"id":"a","type":"counter","delta":1},{"id":"b","type":"gauge","value":2.5}]"#;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/updates/")
                .header("content-type", "application/json")
                .body(Body::from(batch_json))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.oneshot(Request::builder().uri("/value/gauge/b").body(Body::empty()).unwrap()).await.unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], b"2.5");
}

#[tokio::test]
async fn update_one_echoes_enriched_counter() {
    let app = test_app();
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/update/")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"id":"c","type":"counter","delta":23}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], br#"{"id":"c","type":"counter","delta":23}"#);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/update/")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"id":"c","type":"counter","delta":20}"#))
                .unwrap(),
        )
        .await
        .unwrap();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], br#"{"id":"c","type":"counter","delta":43}"#);
}

#[tokio::test]
async fn update_batch_dedupes_repeated_name() {
    let app = test_app();
    let batch_json = r#"[{"id":"c","type":"counter","delta":0},{"id":"c","type":"counter","delta":10},{"id":"c","type":"counter","delta":20}]"#;
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/updates/")
                .header("content-type", "application/json")
                .body(Body::from(batch_json))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&body[..], br#"[{"id":"c","type":"counter","delta":30}]"#);
}

#[tokio::test]
async fn ping_reports_ok() {
    let app = test_app();
    let response = app.oneshot(Request::builder().uri("/ping").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
