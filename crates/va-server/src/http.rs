//! The HTTP surface (spec §1 ambient concern): health checks, metrics, and
//! the WebSocket upgrade route, wrapped in the teacher's CORS/tracing/auth
//! layering.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use once_cell::sync::OnceCell;

use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::auth_middleware;
use crate::orchestrator::{Orchestrator, SharedSettings};
use crate::websocket::ws_handler;

/// Builds the CORS layer from configured origins, falling back to a
/// permissive layer (with a warning) when CORS is disabled, and to
/// localhost-only when no origins are configured.
pub fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled; allowing any origin. Do not run this in production");
        return CorsLayer::permissive();
    }

    if origins.is_empty() {
        tracing::warn!("no CORS origins configured; defaulting to localhost");
        return CorsLayer::new()
            .allow_origin("http://localhost:3000".parse::<HeaderValue>().unwrap())
            .allow_methods([Method::GET, Method::POST])
            .allow_credentials(true);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(parsed)
        .allow_methods([Method::GET, Method::POST])
        .allow_credentials(true)
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn ready(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    let _ = orchestrator.session_count();
    StatusCode::OK
}

#[derive(Debug, Serialize)]
struct SessionSummary {
    #[serde(rename = "sessionId")]
    session_id: String,
    #[serde(rename = "episodeId")]
    episode_id: String,
}

#[derive(Debug, Serialize)]
struct SessionsResponse {
    count: usize,
    sessions: Vec<SessionSummary>,
}

/// Minimal session introspection (spec §6 ambient addition): lists the
/// episode each currently open session was registered for, without
/// exposing any conversation content.
async fn list_sessions(State(orchestrator): State<Arc<Orchestrator>>) -> impl IntoResponse {
    let sessions: Vec<SessionSummary> = orchestrator
        .session_summaries()
        .into_iter()
        .map(|(session_id, episode_id)| SessionSummary { session_id, episode_id })
        .collect();
    Json(SessionsResponse { count: sessions.len(), sessions })
}

static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Installs the global Prometheus recorder exactly once per process; a
/// second `install_recorder()` call would silently replace the first and
/// lose every metric recorded so far, so every caller (startup and the
/// `/metrics` handler, should startup not have run yet) goes through this.
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE
        .get_or_try_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .map_err(|err| tracing::warn!(%err, "failed to install Prometheus recorder"))
        })
        .ok()
}

async fn metrics() -> impl IntoResponse {
    match prometheus_handle() {
        Some(handle) => (StatusCode::OK, handle.render()).into_response(),
        None => StatusCode::SERVICE_UNAVAILABLE.into_response(),
    }
}

/// Inserts the shared settings as a request extension so [`auth_middleware`]
/// can read it without being generic over the router's state type.
async fn inject_settings(
    State(settings): State<SharedSettings>,
    mut request: axum::extract::Request,
    next: middleware::Next,
) -> axum::response::Response {
    request.extensions_mut().insert(settings);
    next.run(request).await
}

/// Assembles the router: health/readiness/metrics are public, the
/// WebSocket route sits behind the auth middleware's configured
/// `public_paths` (spec §1 / §7).
pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let settings = orchestrator.settings();
    let cors_settings = settings.read().clone();
    let cors_layer = build_cors_layer(&cors_settings.server.cors_origins, cors_settings.server.cors_enabled);

    let ws_routes = Router::new()
        .route("/ws/:episode_id", get(ws_handler))
        .with_state(orchestrator.clone());

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .route("/metrics", get(metrics))
        .route("/api/sessions", get(list_sessions))
        .with_state(orchestrator.clone())
        .merge(ws_routes)
        .layer(middleware::from_fn(auth_middleware))
        .layer(middleware::from_fn_with_state(settings, inject_settings))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::RwLock;
    use va_config::Settings;
    use va_core::{NullStt, NullTts};

    #[test]
    fn cors_layer_falls_back_to_localhost_when_unconfigured() {
        let _layer = build_cors_layer(&[], true);
    }

    #[test]
    fn cors_layer_permissive_when_disabled() {
        let _layer = build_cors_layer(&[], false);
    }

    #[tokio::test]
    async fn router_builds_with_default_settings() {
        let orchestrator = Orchestrator::new(
            Arc::new(RwLock::new(Settings::default())),
            Arc::new(NullStt),
            Arc::new(NullTts),
            Arc::new(NullTts),
        );
        let _router = create_router(orchestrator);
    }

    #[tokio::test]
    async fn sessions_endpoint_reports_empty_list_with_no_connections() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let orchestrator = Orchestrator::new(
            Arc::new(RwLock::new(Settings::default())),
            Arc::new(NullStt),
            Arc::new(NullTts),
            Arc::new(NullTts),
        );
        let router = create_router(orchestrator);
        let response = router
            .oneshot(Request::builder().uri("/api/sessions").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
