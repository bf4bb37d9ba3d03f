use axum::{
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::get,
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utils::response::ApiResponse;

use crate::{
    middleware::{auth, permission},
    AppState,
};

pub mod devices;
pub mod workflows;

async fn health_check() -> ResponseJson<ApiResponse<&'static str>> {
    ResponseJson(ApiResponse::success("OK"))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/workflows", workflows::router(&state))
        .nest("/devices", devices::router())
        .layer(from_fn_with_state(
            state.clone(),
            permission::node_permission_middleware,
        ))
        .layer(from_fn_with_state(
            state.clone(),
            auth::resolve_actor_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
