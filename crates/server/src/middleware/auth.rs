//! Actor resolution.
//!
//! The employee directory is an external system; requests carry the caller's
//! username in the `X-Employee` header and this middleware resolves it to an
//! [`Actor`] for the rest of the stack. A missing header or an unknown
//! username yields the anonymous actor rather than an early reject — the
//! permission gate and the engine decide what anonymous callers may do.

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use services::services::directory::Actor;

use crate::AppState;

pub const EMPLOYEE_HEADER: &str = "X-Employee";

pub async fn resolve_actor_middleware(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let username = req
        .headers()
        .get(EMPLOYEE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|u| !u.is_empty());

    let actor = match username {
        Some(username) => match state.directory.lookup(username).await {
            Some(actor) => actor,
            None => {
                tracing::debug!(%username, "unknown employee, treating as anonymous");
                Actor::anonymous()
            }
        },
        None => Actor::anonymous(),
    };

    req.extensions_mut().insert(actor);
    next.run(req).await
}
