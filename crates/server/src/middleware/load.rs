use axum::{
    body::Body,
    extract::{Path, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use db::models::{process::Process, task::Task};
use uuid::Uuid;

use crate::{error::ApiError, AppState};

pub async fn load_process_middleware(
    State(state): State<AppState>,
    Path(process_id): Path<Uuid>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let process = Process::find_by_id(&state.db.pool, process_id)
        .await?
        .ok_or_else(|| {
            tracing::warn!(%process_id, "process not found");
            ApiError::NotFound(format!("process {process_id}"))
        })?;

    request.extensions_mut().insert(process);
    Ok(next.run(request).await)
}

/// Loads the task named by `/workflows/{process_id}/{node_name}/{task_id}/...`
/// paths, checking that it actually belongs to that process and node. A
/// mismatch is indistinguishable from a stale link, so both report not-found.
pub async fn load_task_middleware(
    State(state): State<AppState>,
    Path((process_id, node_name, task_id)): Path<(Uuid, String, Uuid)>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let task = Task::find_by_id(&state.db.pool, task_id)
        .await?
        .filter(|t| t.process_id == process_id && t.node == node_name)
        .ok_or_else(|| {
            tracing::warn!(%task_id, %process_id, %node_name, "task not found");
            ApiError::NotFound(format!("task {task_id}"))
        })?;

    request.extensions_mut().insert(task);
    Ok(next.run(request).await)
}
