use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::rpc;
use crate::AppState;

pub(crate) fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(rpc::healthz))
        .route("/rpc/{service}/{method}", post(rpc::rpc_endpoint))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
