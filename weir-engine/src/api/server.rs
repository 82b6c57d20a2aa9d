//! HTTP server setup and routing
//!
//! Axum router for the control endpoints consumed by the orchestration
//! collaborator. The engine never formats user-facing text; errors map to
//! status codes plus a machine-readable body.

use crate::session::SessionManager;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Shared application context passed to all handlers
#[derive(Clone)]
pub struct AppContext {
    pub manager: Arc<SessionManager>,
}

/// Build the control-surface router.
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        // Health endpoint
        .route("/health", get(super::handlers::health))
        // Session control
        .route("/session/:id/play", post(super::handlers::play))
        .route("/session/:id/stop", post(super::handlers::stop))
        .route("/session/:id/pause", post(super::handlers::pause))
        .route("/session/:id/resume", post(super::handlers::resume))
        .route("/session/:id/status", get(super::handlers::status))
        // All live sessions
        .route("/sessions", get(super::handlers::sessions))
        // Attach application context
        .with_state(ctx)
        // Request tracing + CORS for local tooling
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
