use axum::{
    extract::{Path, State},
    middleware::from_fn_with_state,
    response::Json as ResponseJson,
    routing::{get, post},
    Extension, Json, Router,
};
use db::models::{
    analysis_result::AnalysisResult,
    device::{CreateDevice, Device},
    operation_record::OperationRecord,
    process::{Process, ProcessSummary},
    task::Task,
};
use serde::{Deserialize, Serialize};
use services::services::{
    actions::{available_actions, TaskAction},
    activation::{StartOutcome, SubmitData},
    directory::Actor,
    permission::SUPERVISOR_ROLE,
};
use utils::response::ApiResponse;
use uuid::Uuid;

use crate::{error::ApiError, middleware::load, AppState};

pub async fn start_workflow(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(payload): Json<CreateDevice>,
) -> Result<ResponseJson<ApiResponse<StartOutcome>>, ApiError> {
    let outcome = state.engine.start_process(&actor, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub async fn list_workflows(
    State(state): State<AppState>,
) -> Result<ResponseJson<ApiResponse<Vec<ProcessSummary>>>, ApiError> {
    let summaries = Process::list_summaries(&state.db.pool).await?;
    Ok(ResponseJson(ApiResponse::success(summaries)))
}

/// Full dashboard view of one investigation: every visited task with the
/// evidence recorded at it.
#[derive(Debug, Serialize)]
pub struct ProcessDetail {
    pub process: Process,
    pub device: Device,
    pub tasks: Vec<TaskDetail>,
}

#[derive(Debug, Serialize)]
pub struct TaskDetail {
    pub task: Task,
    pub operation_records: Vec<OperationRecord>,
    pub analysis_results: Vec<AnalysisResult>,
}

pub async fn get_workflow(
    State(state): State<AppState>,
    Extension(process): Extension<Process>,
) -> Result<ResponseJson<ApiResponse<ProcessDetail>>, ApiError> {
    let device = Device::find_by_id(&state.db.pool, process.device_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("device {}", process.device_id)))?;

    let mut tasks = Vec::new();
    for task in Task::find_by_process(&state.db.pool, process.id).await? {
        let operation_records = OperationRecord::find_by_task(&state.db.pool, task.id).await?;
        let analysis_results = AnalysisResult::find_by_task(&state.db.pool, task.id).await?;
        tasks.push(TaskDetail {
            task,
            operation_records,
            analysis_results,
        });
    }

    Ok(ResponseJson(ApiResponse::success(ProcessDetail {
        process,
        device,
        tasks,
    })))
}

pub async fn assign_task(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Extension(task): Extension<Task>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let task = state.engine.assign(&actor, task.id).await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn execute_task(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Extension(task): Extension<Task>,
    Json(payload): Json<SubmitData>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    let task = state.engine.submit(&actor, task.id, &payload).await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewAction {
    #[default]
    Approve,
    Reject,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReviewRequest {
    #[serde(default)]
    pub action: ReviewAction,
}

#[derive(Debug, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReviewOutcome {
    Approved {
        task: Task,
        next_task: Option<Task>,
        process_finished: bool,
    },
    Rejected {
        task: Task,
    },
}

/// Approve advances the flow; reject hands the task back for rework. Both
/// arrive at the same endpoint, selected by the `action` field, exactly as
/// the review form submits them.
pub async fn review_task(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Extension(task): Extension<Task>,
    Json(payload): Json<ReviewRequest>,
) -> Result<ResponseJson<ApiResponse<ReviewOutcome>>, ApiError> {
    let outcome = match payload.action {
        ReviewAction::Approve => {
            let outcome = state.engine.approve(&actor, task.id).await?;
            ReviewOutcome::Approved {
                task: outcome.task,
                next_task: outcome.next_task,
                process_finished: outcome.process_finished,
            }
        }
        ReviewAction::Reject => {
            let task = state.engine.reject(&actor, task.id).await?;
            ReviewOutcome::Rejected { task }
        }
    };
    Ok(ResponseJson(ApiResponse::success(outcome)))
}

pub async fn cancel_task(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Extension(task): Extension<Task>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    require_supervisor(&actor)?;
    let task = state.engine.cancel(&actor, task.id).await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn unassign_task(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Extension(task): Extension<Task>,
) -> Result<ResponseJson<ApiResponse<Task>>, ApiError> {
    require_supervisor(&actor)?;
    let task = state.engine.unassign(&actor, task.id).await?;
    Ok(ResponseJson(ApiResponse::success(task)))
}

pub async fn get_task_actions(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path((process_id, task_id)): Path<(Uuid, Uuid)>,
) -> Result<ResponseJson<ApiResponse<Vec<TaskAction>>>, ApiError> {
    let task = Task::find_by_id(&state.db.pool, task_id)
        .await?
        .filter(|t| t.process_id == process_id)
        .ok_or_else(|| ApiError::NotFound(format!("task {task_id}")))?;

    let actions = available_actions(&task, &actor, state.gate.as_ref());
    Ok(ResponseJson(ApiResponse::success(actions)))
}

/// Cancel and unassign have no gated URL pattern; they carry the same
/// manage-level requirement the resolver applies when listing them.
fn require_supervisor(actor: &Actor) -> Result<(), ApiError> {
    if actor.has_role(SUPERVISOR_ROLE) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!("需要{SUPERVISOR_ROLE}角色权限")))
    }
}

pub fn router(state: &AppState) -> Router<AppState> {
    let task_action_routes = Router::new()
        .route("/{process_id}/{node_name}/{task_id}/assign", post(assign_task))
        .route("/{process_id}/{node_name}/{task_id}/execute", post(execute_task))
        .route("/{process_id}/{node_name}/{task_id}/approve", post(review_task))
        .route("/{process_id}/{node_name}/{task_id}/cancel", post(cancel_task))
        .route("/{process_id}/{node_name}/{task_id}/unassign", post(unassign_task))
        .layer(from_fn_with_state(state.clone(), load::load_task_middleware));

    let process_routes = Router::new()
        .route("/{process_id}", get(get_workflow))
        .layer(from_fn_with_state(state.clone(), load::load_process_middleware));

    Router::new()
        .route("/", get(list_workflows))
        .route("/start", post(start_workflow))
        .route("/{process_id}/tasks/{task_id}/actions", get(get_task_actions))
        .merge(process_routes)
        .merge(task_action_routes)
}
