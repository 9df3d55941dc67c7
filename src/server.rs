//! HTTP surface of the agent.
//!
//! Routes mirror the device endpoint contract: system info (GET, and POST
//! for registration behind basic auth), system status, a reboot
//! acknowledgement, a health probe and a root service index. Every
//! response carries permissive CORS headers; OPTIONS preflights are
//! answered before routing.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::device::DeviceRecord;
use crate::secret::SecretString;
use crate::status::{self, DeviceStatus, UptimeBreakdown};
use crate::store::{DeviceStore, PersistError, UpdateError};

pub struct AuthCredentials {
    pub username: String,
    pub password: SecretString,
}

pub struct AppState {
    pub store: Arc<DeviceStore>,
    pub auth: AuthCredentials,
    pub started: Instant,
}

pub fn router(app: Arc<AppState>) -> Router {
    Router::new()
        .route(
            "/v1/core/system/info",
            get(get_system_info).post(post_system_info),
        )
        .route("/v1/core/system/status", get(get_system_status))
        .route("/v1/core/system/reboot", post(post_system_reboot))
        .route("/health", get(health))
        .route("/", get(index))
        .layer(middleware::from_fn(cors))
        .with_state(app)
}

#[derive(Debug, Error)]
enum RegistrationError {
    #[error(transparent)]
    Rejected(#[from] UpdateError),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

#[derive(Serialize)]
struct SystemInfoBody {
    device: DeviceRecord,
    status: DeviceStatus,
    endpoint_port: String,
    instances: Vec<String>,
}

#[derive(Serialize)]
struct SystemStatusBody {
    timestamp: String,
    uptime: UptimeBreakdown,
    detector_configured: bool,
}

/// GET /v1/core/system/info — device record, status, port and instances.
async fn get_system_info(State(app): State<Arc<AppState>>) -> Response {
    let store = app.store.clone();
    let body = tokio::task::spawn_blocking(move || SystemInfoBody {
        device: store.record(),
        status: status::snapshot(),
        endpoint_port: store.endpoint_port(),
        instances: store.instances(),
    })
    .await;

    match body {
        Ok(body) => Json(body).into_response(),
        Err(e) => internal_error(&e.to_string()),
    }
}

/// POST /v1/core/system/info — register/update device information.
/// Runs update, persist and reload so subsequent reads reflect exactly
/// what was just written.
async fn post_system_info(
    State(app): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    if !check_basic_auth(&headers, &app.auth) {
        return (
            StatusCode::UNAUTHORIZED,
            [(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"Device Registration\""),
            )],
            Json(json!({"error": "Unauthorized", "message": "Invalid credentials"})),
        )
            .into_response();
    }

    if body.is_empty() {
        return bad_request("JSON body is required");
    }

    let store = app.store.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        store.update_from_json(&body)?;
        store.persist()?;
        store.reload();
        Ok::<(), RegistrationError>(())
    })
    .await;

    match outcome {
        Ok(Ok(())) => Json(json!({
            "status": "success",
            "message": "Device information registered successfully",
        }))
        .into_response(),
        Ok(Err(RegistrationError::Rejected(e))) => {
            tracing::warn!(error = %e, "registration rejected");
            bad_request("Failed to parse JSON or invalid format")
        }
        Ok(Err(RegistrationError::Persist(e))) => {
            tracing::error!(error = %e, "registration persist failed");
            internal_error("Failed to save configuration")
        }
        Err(e) => internal_error(&e.to_string()),
    }
}

/// GET /v1/core/system/status — timestamp, uptime breakdown, detector flag.
async fn get_system_status() -> Response {
    let snapshot = tokio::task::spawn_blocking(status::snapshot).await;
    match snapshot {
        Ok(s) => Json(SystemStatusBody {
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            uptime: UptimeBreakdown::from_seconds(s.uptime_seconds),
            detector_configured: s.detector_configured,
        })
        .into_response(),
        Err(e) => internal_error(&e.to_string()),
    }
}

/// POST /v1/core/system/reboot — acknowledged only, never executed.
async fn post_system_reboot() -> Response {
    tracing::info!("reboot requested, acknowledging without executing");
    Json(json!({"status": "success", "message": "System reboot initiated"})).into_response()
}

async fn health(State(app): State<Arc<AppState>>) -> Response {
    Json(json!({
        "status": "ok",
        "uptime_seconds": app.started.elapsed().as_secs(),
    }))
    .into_response()
}

async fn index() -> Response {
    Json(json!({
        "service": "Device Agent",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "system_info": "GET /v1/core/system/info",
            "system_info_register": "POST /v1/core/system/info (Basic Auth required)",
            "system_status": "GET /v1/core/system/status",
            "system_reboot": "POST /v1/core/system/reboot",
        },
    }))
    .into_response()
}

/// Answer OPTIONS preflights and stamp CORS headers on every response.
async fn cors(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        let mut res = StatusCode::OK.into_response();
        apply_cors(res.headers_mut());
        return res;
    }
    let mut res = next.run(req).await;
    apply_cors(res.headers_mut());
    res
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
}

fn check_basic_auth(headers: &HeaderMap, auth: &AuthCredentials) -> bool {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return false;
    };
    let encoded: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let Ok(decoded) = BASE64.decode(encoded) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    let Some((username, password)) = decoded.split_once(':') else {
        return false;
    };
    username == auth.username && password == auth.password.expose()
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({"error": "Bad Request", "message": message})),
    )
        .into_response()
}

fn internal_error(message: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"error": "Internal Server Error", "message": message})),
    )
        .into_response()
}
