// SPDX-License-Identifier: Apache-2.0
//! Admin HTTP listener: health checks, Prometheus metrics, and policy reload.

use crate::metrics::metrics;
use crate::policy::PolicyHandle;
use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tracing::{error, info};

/// Readiness state shared between the admin listener and the dispatcher.
#[derive(Clone)]
pub struct ServerState {
    /// Whether the daemon accepts TACACS+ connections.
    ready: Arc<AtomicBool>,
    alive: Arc<AtomicBool>,
}

impl ServerState {
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Cleared once shutdown has finished draining.
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct AdminState {
    pub server: ServerState,
    pub policy: PolicyHandle,
}

#[derive(serde::Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(serde::Serialize)]
struct ReloadResponse {
    status: &'static str,
    generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn health_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(HealthResponse { status: "healthy" }),
    )
}

/// 200 while accepting connections; 503 with "draining" during shutdown.
async fn ready_handler(State(state): State<AdminState>) -> Response {
    let server = &state.server;
    if server.is_ready() {
        (
            StatusCode::OK,
            axum::Json(HealthResponse { status: "ready" }),
        )
            .into_response()
    } else if server.is_alive() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(HealthResponse { status: "draining" }),
        )
            .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(HealthResponse {
                status: "not_ready",
            }),
        )
            .into_response()
    }
}

async fn live_handler(State(state): State<AdminState>) -> Response {
    if state.server.is_alive() {
        (
            StatusCode::OK,
            axum::Json(HealthResponse { status: "alive" }),
        )
            .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(HealthResponse { status: "dead" }),
        )
            .into_response()
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let body = metrics().encode();
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        body,
    )
}

/// Same effect as SIGHUP. A failed reload leaves the active policy in place.
async fn reload_handler(State(state): State<AdminState>) -> Response {
    match state.policy.reload().await {
        Ok(generation) => (
            StatusCode::OK,
            axum::Json(ReloadResponse {
                status: "reloaded",
                generation,
                error: None,
            }),
        )
            .into_response(),
        Err(err) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            axum::Json(ReloadResponse {
                status: "failed",
                generation: state.policy.generation(),
                error: Some(err.to_string()),
            }),
        )
            .into_response(),
    }
}

pub fn build_router(state: AdminState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/live", get(live_handler))
        .route("/metrics", get(metrics_handler))
        .route("/reload", post(reload_handler))
        .with_state(state)
}

pub async fn serve_http(addr: SocketAddr, state: AdminState) -> anyhow::Result<()> {
    let app = build_router(state);

    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "admin HTTP listener ready");

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "HTTP server error");
        return Err(e.into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use std::io::Write;
    use std::path::Path;
    use tacd_policy::PolicyStore;
    use tower::ServiceExt;

    fn admin_state() -> AdminState {
        AdminState {
            server: ServerState::new(),
            policy: PolicyHandle::new(PolicyStore::from_json_str("{}").unwrap()),
        }
    }

    async fn body_string(response: Response) -> String {
        let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(body_bytes.to_vec()).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_request(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(admin_state());
        let response = app.oneshot(get_request("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("healthy"));
    }

    #[tokio::test]
    async fn test_ready_endpoint_transitions() {
        let state = admin_state();
        let app = build_router(state.clone());
        let response = app.clone().oneshot(get_request("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_string(response).await.contains("draining"));

        state.server.set_ready(true);
        let response = app.clone().oneshot(get_request("/ready")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        state.server.set_ready(false);
        state.server.set_alive(false);
        let response = app.oneshot(get_request("/ready")).await.unwrap();
        assert!(body_string(response).await.contains("not_ready"));
    }

    #[tokio::test]
    async fn test_live_endpoint() {
        let state = admin_state();
        let app = build_router(state.clone());
        let response = app.clone().oneshot(get_request("/live")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        state.server.set_alive(false);
        let response = app.oneshot(get_request("/live")).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(body_string(response).await.contains("dead"));
    }

    #[tokio::test]
    async fn test_metrics_content_type() {
        let app = build_router(admin_state());
        let response = app.oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(content_type.contains("text/plain"));
        assert!(body_string(response).await.contains("tacd_policy_generation"));
    }

    #[tokio::test]
    async fn test_reload_swaps_policy() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(br#"{ "defaults": { "authorization": "deny" } }"#)
            .unwrap();
        let store = PolicyStore::from_path(file.path(), None::<&Path>).unwrap();
        let state = AdminState {
            server: ServerState::new(),
            policy: PolicyHandle::new(store).with_source(file.path(), None),
        };
        let app = build_router(state.clone());

        std::fs::write(file.path(), r#"{ "defaults": { "authorization": "permit" } }"#).unwrap();
        let response = app.clone().oneshot(post_request("/reload")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_string(response).await.contains("\"generation\":2"));
        assert!(state.policy.snapshot().await.default_authorization().is_permit());

        std::fs::write(file.path(), "{ \"users\": 7 }").unwrap();
        let response = app.oneshot(post_request("/reload")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_string(response).await.contains("failed"));
        assert_eq!(state.policy.generation(), 2);
    }

    #[tokio::test]
    async fn test_reload_requires_post() {
        let app = build_router(admin_state());
        let response = app.oneshot(get_request("/reload")).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
