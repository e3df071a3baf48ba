//! HTTP routes

pub mod health;
pub mod internal;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{auth::require_internal_key, state::AppState, websocket::ws_handler};

/// Create all routes
pub fn create_router(state: AppState) -> Router {
    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness));

    // WebSocket route (auth handled in handler before upgrade)
    let websocket_routes = Router::new().route("/ws", get(ws_handler));

    // Collaborator surface for the REST layer
    let internal_routes = Router::new()
        .route("/presence/:identity", get(internal::presence))
        .route("/events", post(internal::push_event))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_internal_key,
        ));

    Router::new()
        .merge(health_routes)
        .merge(websocket_routes)
        .nest("/internal", internal_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
