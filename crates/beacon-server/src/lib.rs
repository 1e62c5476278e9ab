//! Beacon coordination server: HTTP API and WebSocket feeds.

pub mod api_incidents;
pub mod api_ws;
pub mod config;
pub mod dispatch;
pub mod registry;

use axum::{
    extract::{DefaultBodyLimit, Extension},
    routing::{get, post, put},
    Json, Router,
};
use beacon_db::DbPool;
use registry::ChannelRegistry;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Maximum accepted request body size (1 MiB).
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub registry: ChannelRegistry,
}

/// `GET /health` — liveness probe.
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Builds the application router with all routes and middleware.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/incidents", post(api_incidents::create_incident_handler))
        .route(
            "/api/incidents/{incidentId}",
            get(api_incidents::get_incident_handler),
        )
        .route(
            "/api/incidents/{incidentId}/track",
            get(api_incidents::track_incident_handler),
        )
        .route(
            "/api/incidents/{incidentId}/assign",
            put(api_incidents::assign_incident_handler),
        )
        .route(
            "/api/incidents/{incidentId}/escalate",
            put(api_incidents::escalate_incident_handler),
        )
        .route(
            "/api/incidents/{incidentId}/status",
            put(api_incidents::update_status_handler),
        )
        .route(
            "/api/incidents/user/{userId}/history",
            get(api_incidents::reporter_history_handler),
        )
        .route(
            "/api/responders",
            post(api_incidents::register_responder_handler),
        )
        .route(
            "/api/gov/authorities",
            post(api_incidents::register_gov_authority_handler),
        )
        .route("/ws/incident/{incidentId}", get(api_ws::ws_incident_handler))
        .route("/ws/ngo/{ngoId}", get(api_ws::ws_ngo_handler))
        .route("/ws/gov/{jurisdiction}", get(api_ws::ws_gov_handler))
        .route("/ws/user/{userId}", get(api_ws::ws_user_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(Extension(Arc::new(state)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("health.db");
        let pool = beacon_db::create_pool(
            path.to_str().expect("utf8 path"),
            beacon_db::DbRuntimeSettings::default(),
        )
        .expect("pool");
        {
            let conn = pool.get().expect("conn");
            beacon_db::run_migrations(&conn).expect("migrations");
        }
        // Leak the tempdir so the db outlives this helper.
        std::mem::forget(dir);
        AppState {
            pool,
            registry: ChannelRegistry::new(),
        }
    }

    #[tokio::test]
    async fn health_returns_ok_with_version() {
        let app = app(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
    }
}
