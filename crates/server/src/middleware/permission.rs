//! Node-operation permission gate, applied to every request.
//!
//! Paths that match a configured operation pattern (assign / execute /
//! approve) are checked against the target task's node before any handler
//! runs: the task id is taken from the URL itself, its node looked up, and
//! the department and role axes evaluated in order. Everything else passes
//! through untouched. Denials answer with the structured
//! `{code, message, success: false}` payload and never a bare 403.

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use db::models::task::Task;
use serde_json::json;
use services::services::{directory::Actor, permission::DenialReason};
use uuid::Uuid;

use crate::AppState;

pub async fn node_permission_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    let Some(matched) = state.gate.match_operation(&path) else {
        return next.run(req).await;
    };

    let actor = req
        .extensions()
        .get::<Actor>()
        .cloned()
        .unwrap_or_else(Actor::anonymous);

    // Gated paths all look like /workflows/{process}/{node}/{task}/{op};
    // the task id is the second-to-last segment.
    let Some(task_id) = task_id_from_path(&path) else {
        return deny(&path, &actor, None, DenialReason::MissingTaskId);
    };

    let task = match Task::find_by_id(&state.db.pool, task_id).await {
        Ok(Some(task)) => task,
        Ok(None) => return deny(&path, &actor, None, DenialReason::TaskNotFound),
        Err(e) => {
            tracing::error!(%path, %task_id, error = %e, "permission check failed to load task");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "code": "internal_error",
                    "message": "Unexpected error, please contact the administrator",
                    "success": false,
                })),
            )
                .into_response();
        }
    };

    if let Err(reason) = state.gate.check(&matched, &task.node, &actor) {
        return deny(&path, &actor, Some(&task.node), reason);
    }

    tracing::debug!(
        %path,
        actor = %actor.username,
        node = %task.node,
        operation = %matched.operation,
        "node permission granted"
    );
    next.run(req).await
}

fn task_id_from_path(path: &str) -> Option<Uuid> {
    let mut segments = path.rsplit('/');
    segments.next()?;
    segments.next().and_then(|s| Uuid::parse_str(s).ok())
}

fn deny(path: &str, actor: &Actor, node: Option<&str>, reason: DenialReason) -> Response {
    tracing::warn!(
        %path,
        actor = %actor.username,
        node = node.unwrap_or("<unknown>"),
        code = reason.code(),
        "node permission denied: {}",
        reason.message()
    );
    (
        StatusCode::FORBIDDEN,
        Json(json!({
            "code": reason.code(),
            "message": reason.message(),
            "success": false,
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_parsed_from_gated_path() {
        let id = Uuid::new_v4();
        let path = format!("/workflows/{}/X_ray_test/{id}/approve", Uuid::new_v4());
        assert_eq!(task_id_from_path(&path), Some(id));
    }

    #[test]
    fn malformed_task_segment_yields_none() {
        assert_eq!(
            task_id_from_path("/workflows/p1/X_ray_test/not-a-uuid/approve"),
            None
        );
        assert_eq!(task_id_from_path("/approve"), None);
    }
}
