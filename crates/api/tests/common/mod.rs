#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use tabletop_api::config::ServerConfig;
use tabletop_api::router::build_app_router;
use tabletop_api::state::AppState;
use tabletop_core::keys::KeySpace;
use tabletop_store::StoreHandle;

/// Build a test `ServerConfig` with safe defaults.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default)
/// and a 30-second request timeout.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        session_setup_queue: "session-setup".to_string(),
    }
}

/// Build the full application router over a fresh in-memory store.
///
/// Uses the same [`build_app_router`] as `main.rs`, so tests exercise the
/// production middleware stack.
pub fn build_test_app() -> Router {
    build_test_app_with_state().0
}

/// Like [`build_test_app`], but also hands back the state so tests can
/// arrange store contents directly.
pub fn build_test_app_with_state() -> (Router, AppState) {
    build_test_app_over(StoreHandle::in_memory())
}

/// Build the application over a caller-supplied store.
pub fn build_test_app_over(store: StoreHandle) -> (Router, AppState) {
    let config = test_config();
    let state = AppState::new(config.clone(), store, KeySpace::new("test"));
    (build_app_router(state.clone(), &config), state)
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

async fn send(app: Router, request: Request<Body>) -> Response {
    app.oneshot(request).await.unwrap()
}

fn request(method: Method, uri: &str, user: Option<&str>, body: Option<serde_json::Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&json).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// GET without a caller identity.
pub async fn get(app: Router, uri: &str) -> Response {
    send(app, request(Method::GET, uri, None, None)).await
}

/// POST a JSON body without a caller identity.
pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    send(app, request(Method::POST, uri, None, Some(body))).await
}

/// POST a JSON body as `user`.
pub async fn post_json_as(app: Router, uri: &str, user: &str, body: serde_json::Value) -> Response {
    send(app, request(Method::POST, uri, Some(user), Some(body))).await
}

/// POST an empty body as `user`.
pub async fn post_as(app: Router, uri: &str, user: &str) -> Response {
    send(app, request(Method::POST, uri, Some(user), None)).await
}

/// PATCH a JSON body as `user`.
pub async fn patch_json_as(app: Router, uri: &str, user: &str, body: serde_json::Value) -> Response {
    send(app, request(Method::PATCH, uri, Some(user), Some(body))).await
}

/// DELETE as `user`.
pub async fn delete_as(app: Router, uri: &str, user: &str) -> Response {
    send(app, request(Method::DELETE, uri, Some(user), None)).await
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
