pub mod config;
pub mod feed;
pub mod fleet;
pub mod handlers;
pub mod push;
pub mod registry;
pub mod store;

use std::sync::Arc;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::AppState;

/// Assemble the full router. Method routing means a wrong verb on any of
/// these paths answers 405.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/machines", get(handlers::get_machines))
        .route("/api/subscribe", post(handlers::subscribe))
        .route("/api/unsubscribe", post(handlers::unsubscribe))
        .route(
            "/api/machine-status-update",
            post(handlers::machine_status_update),
        )
        .route("/ws", get(feed_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn feed_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let feed = Arc::clone(&state.feed);
    ws.on_upgrade(move |socket| feed::handle_socket(socket, feed))
}
