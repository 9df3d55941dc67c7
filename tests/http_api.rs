//! Router-level tests driving the HTTP surface with in-process requests:
//! health and index routes, CORS preflight, basic-auth enforcement, and a
//! full registration round-trip through POST then GET system info.

use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use device_agent::secret::SecretString;
use device_agent::server::{router, AppState, AuthCredentials};
use device_agent::store::DeviceStore;
use device_agent::sysuuid::UuidSource;

struct FixedUuid;

impl UuidSource for FixedUuid {
    fn system_uuid(&self) -> String {
        "11111111-2222-3333-4444-555555555555".to_string()
    }
}

// Store loads read DEVICE_* environment variables; serialize the tests
// that hit the store.
static ENV_LOCK: Mutex<()> = Mutex::new(());

fn test_router(dir: &std::path::Path) -> Router {
    let store = Arc::new(DeviceStore::with_uuid_source(
        vec![dir.join("device_registered.json")],
        Box::new(FixedUuid),
    ));
    router(Arc::new(AppState {
        store,
        auth: AuthCredentials {
            username: "cvedix".to_string(),
            password: SecretString::new("cvedix"),
        },
        started: Instant::now(),
    }))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

const AUTH: &str = "Basic Y3ZlZGl4OmN2ZWRpeA=="; // cvedix:cvedix

#[tokio::test]
async fn test_health_route() {
    let dir = tempfile::tempdir().unwrap();
    let response = test_router(dir.path())
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_index_lists_endpoints() {
    let dir = tempfile::tempdir().unwrap();
    let response = test_router(dir.path())
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["endpoints"]["system_info"], "GET /v1/core/system/info");
}

#[tokio::test]
async fn test_options_preflight_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let response = test_router(dir.path())
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/v1/core/system/info")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_METHODS)
            .unwrap(),
        "GET, POST, OPTIONS"
    );
}

#[tokio::test]
async fn test_register_requires_auth() {
    let dir = tempfile::tempdir().unwrap();
    let response = test_router(dir.path())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/core/system/info")
                .body(Body::from(r#"{"device": {}}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));
}

#[tokio::test]
async fn test_register_rejects_payload_without_device_object() {
    let _guard = ENV_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let response = test_router(dir.path())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/core/system/info")
                .header(header::AUTHORIZATION, AUTH)
                .body(Body::from(r#"{"instances": ["a"]}"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_register_then_get_reflects_update() {
    let _guard = ENV_LOCK.lock().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let app = test_router(dir.path());

    let payload =
        r#"{"device": {"model_type": "X1"}, "endpoint_port": "9000", "instances": ["a", "b"]}"#;
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/core/system/info")
                .header(header::AUTHORIZATION, AUTH)
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/core/system/info")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["device"]["model_type"], "X1");
    assert_eq!(
        json["device"]["system_uuid"],
        "11111111-2222-3333-4444-555555555555"
    );
    assert_eq!(json["endpoint_port"], "9000");
    assert_eq!(json["instances"][0], "a");
    assert_eq!(json["instances"][1], "b");
    // endpoint_port is a deployment parameter, not part of the device object
    assert!(json["device"].get("endpoint_port").is_none());
}

#[tokio::test]
async fn test_status_route_shape() {
    let dir = tempfile::tempdir().unwrap();
    let response = test_router(dir.path())
        .oneshot(
            Request::builder()
                .uri("/v1/core/system/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert!(json["timestamp"].is_string());
    assert!(json["uptime"]["seconds"].is_number());
    assert!(json["detector_configured"].is_boolean());
}

#[tokio::test]
async fn test_reboot_acknowledged_not_executed() {
    let dir = tempfile::tempdir().unwrap();
    let response = test_router(dir.path())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/core/system/reboot")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "success");
}
