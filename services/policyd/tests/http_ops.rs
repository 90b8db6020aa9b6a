mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{Harness, orders_store};
use policyd::app::{AppState, build_router};
use policyd::store::RbacStore;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tower::ServiceExt;

async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

async fn app() -> (Harness, axum::Router) {
    let store: Arc<dyn RbacStore> = Arc::new(orders_store().await);
    let harness = Harness::new(store.clone()).await;
    let state = AppState {
        sync: harness.sync.clone(),
        authorizer: harness.authorizer.clone(),
        store,
        cache: harness.cache.clone(),
        signal: harness.signal.clone(),
    };
    (harness, build_router(state))
}

#[tokio::test]
async fn health_reports_backends_and_cache_outage() {
    let (harness, app) = app().await;
    let response = app
        .clone()
        .oneshot(empty_request("GET", "/healthz"))
        .await
        .expect("health");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "memory");
    assert_eq!(body["cache"], "flaky");
    assert_eq!(body["policy_loaded"], false);

    harness.cache.failing.store(true, Ordering::SeqCst);
    let response = app
        .oneshot(empty_request("GET", "/healthz"))
        .await
        .expect("health");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(read_json(response).await["status"], "degraded");
}

#[tokio::test]
async fn policy_status_tracks_reloads() {
    let (_harness, app) = app().await;
    let response = app
        .clone()
        .oneshot(empty_request("GET", "/v1/policy"))
        .await
        .expect("status");
    let body = read_json(response).await;
    assert_eq!(body["loaded"], false);
    assert!(body["generation"].is_null());

    let response = app
        .clone()
        .oneshot(empty_request("POST", "/v1/signal/bump"))
        .await
        .expect("bump");
    assert_eq!(response.status(), StatusCode::OK);
    let signal = read_json(response).await["signal"].as_i64().expect("signal");

    let response = app
        .clone()
        .oneshot(empty_request("POST", "/v1/policy/reload"))
        .await
        .expect("reload");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["swapped"], true);
    assert_eq!(body["generation"], 1);
    assert_eq!(body["lines"], 5);

    let response = app
        .oneshot(empty_request("GET", "/v1/policy"))
        .await
        .expect("status");
    let body = read_json(response).await;
    assert_eq!(body["loaded"], true);
    assert_eq!(body["enforcement_enabled"], true);
    assert_eq!(body["generation"], 1);
    assert_eq!(body["signal"], signal);
    assert_eq!(body["last_applied"], signal);
    assert!(body["built_at_unix_ms"].as_u64().is_some());
}

#[tokio::test]
async fn authorize_endpoint_applies_any_role_rule() {
    let (harness, app) = app().await;
    let request = serde_json::json!({
        "subjects": ["editor"],
        "path": "/api/v1/orders",
        "method": "GET",
    });

    let response = app
        .clone()
        .oneshot(json_request("POST", "/v1/authorize", request.clone()))
        .await
        .expect("authorize");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = read_json(response).await;
    assert_eq!(body["decision"], "deny");
    assert_eq!(body["reason"], "not_loaded");

    harness.sync.load().await.expect("load");
    let response = app
        .clone()
        .oneshot(json_request("POST", "/v1/authorize", request))
        .await
        .expect("authorize");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["decision"], "allow");

    let response = app
        .oneshot(json_request(
            "POST",
            "/v1/authorize",
            serde_json::json!({
                "subjects": ["editor", "exporter"],
                "path": "/api/v1/orders/export",
                "method": "POST",
            }),
        ))
        .await
        .expect("authorize");
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(read_json(response).await["reason"], "no_matching_role");
}

#[tokio::test]
async fn bump_fails_when_cache_is_down() {
    let (harness, app) = app().await;
    harness.cache.failing.store(true, Ordering::SeqCst);
    let response = app
        .oneshot(empty_request("POST", "/v1/signal/bump"))
        .await
        .expect("bump");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(read_json(response).await["code"], "signal_unavailable");
}
