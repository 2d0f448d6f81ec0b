pub mod config;
pub mod gateway;
pub mod handlers;
pub mod ratelimit;
pub mod storage;
pub mod websocket;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{create_session, get_session, health_check, patch_session, SharedGateway};
use crate::websocket::subscribe_handler;

/// Assemble the full HTTP surface around a gateway.
pub fn router(gateway: SharedGateway) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/session",
            post(create_session).get(get_session).patch(patch_session),
        )
        .route("/ws/:code", get(subscribe_handler))
        .with_state(gateway)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
