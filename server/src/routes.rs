//! HTTP and WebSocket routes

mod api;
mod ws;

use axum::Router;

use crate::state::AppState;

/// Create main router with all routes
pub fn app_routes(state: AppState) -> Router {
    Router::new()
        // REST API routes
        .nest("/api", api::routes())
        // Realtime job updates
        .merge(ws::routes())
        .with_state(state)
}
