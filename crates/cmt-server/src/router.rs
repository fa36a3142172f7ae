use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handler::{self, AppState};

/// Build the axum router with all mirror endpoints.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(handler::health_handler))
        .route("/v1/trees", get(handler::trees_handler))
        .route("/v1/trees/:tree/proof/leaf/:hash", get(handler::leaf_proof_handler))
        .route("/v1/trees/:tree/proof/node/:index", get(handler::node_proof_handler))
        .route("/v1/trees/:tree/assets/:nonce", get(handler::asset_handler))
        .route("/v1/trees/:tree/status", get(handler::status_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
