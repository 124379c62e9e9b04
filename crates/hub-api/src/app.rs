use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use hub_store::StateStore;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;

pub fn build_app(store: Arc<dyn StateStore>) -> Router {
    let state = AppState { store };

    Router::new()
        .route("/health", get(handlers::health))
        .route("/ready", get(handlers::ready))
        .route("/metrics", get(handlers::metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
