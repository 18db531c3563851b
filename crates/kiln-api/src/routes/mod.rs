//! API routes.

pub mod builds;
pub mod health;

use crate::AppState;
use crate::ws::logs_handler;
use axum::Router;
use axum::routing::get;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .route("/ws/logs/{build_id}", get(logs_handler))
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    builds::router()
}
