//! HTTP Surface Tests
//!
//! Drive the axum router end to end against a real SQLite pool: actor
//! resolution from the employee header, the node permission gate's 403
//! payloads, transition endpoints, and the dashboard projections. The
//! engine's own guard/branching behavior is covered by the services suite.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use db::DBService;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use server::{routes, AppState};
use services::services::{
    activation::ActivationEngine,
    config::{EmployeeEntry, PermissionRules},
    directory::{Directory, StaticDirectory},
    events::EventService,
    flow::{device_investigation, nodes},
    permission::PermissionGate,
};
use sqlx::SqlitePool;
use tower::util::ServiceExt;

// ============================================================================
// TEST SETUP UTILITIES
// ============================================================================

fn employee(username: &str, department: &str, role: &str) -> EmployeeEntry {
    EmployeeEntry {
        username: username.to_string(),
        department: Some(department.to_string()),
        roles: vec![role.to_string()],
    }
}

fn app(pool: &SqlitePool) -> Router {
    let db = DBService::from_pool(pool.clone());
    let flow = Arc::new(device_investigation(false).expect("flow validates"));
    let gate = Arc::new(PermissionGate::from_rules(&PermissionRules::default()).unwrap());
    let directory: Arc<dyn Directory> = Arc::new(StaticDirectory::new(&[
        employee("line_sup", "产线", "部门主管"),
        employee("line_emp", "产线", "普通员工"),
        employee("fae_sup", "FAE", "部门主管"),
        employee("fae_emp", "FAE", "普通员工"),
    ]));
    let engine = ActivationEngine::new(db.clone(), flow, EventService::new());
    routes::router(AppState {
        db,
        engine,
        gate,
        directory,
    })
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    employee: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(employee) = employee {
        builder = builder.header("X-Employee", employee);
    }
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// Open an investigation and return (process_id, first task id).
async fn start_investigation(app: &Router, sn: &str) -> (String, String) {
    let (status, body) = send(
        app,
        "POST",
        "/workflows/start",
        Some("line_sup"),
        Some(json!({ "sn": sn, "fail_station": "RF-03" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let process_id = body["data"]["process"]["id"].as_str().unwrap().to_string();
    let task_id = body["data"]["first_task"]["id"].as_str().unwrap().to_string();
    (process_id, task_id)
}

fn action_url(process_id: &str, node: &str, task_id: &str, op: &str) -> String {
    format!("/workflows/{process_id}/{node}/{task_id}/{op}")
}

// ============================================================================
// LIFECYCLE OVER HTTP
// ============================================================================

#[sqlx::test(migrations = "../db/migrations")]
async fn health_check_responds(pool: SqlitePool) {
    let app = app(&pool);
    let (status, body) = send(&app, "GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "OK");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn start_creates_investigation_and_lists_it(pool: SqlitePool) {
    let app = app(&pool);
    let (status, body) = send(
        &app,
        "POST",
        "/workflows/start",
        Some("line_sup"),
        Some(json!({ "sn": "SN-1001", "project": "P1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["device"]["sn"], "SN-1001");
    assert_eq!(
        body["data"]["first_task"]["node"],
        nodes::PRODUCTION_TEST_FAIL
    );
    assert_eq!(body["data"]["first_task"]["status"], "new");
    assert!(body["data"]["first_task"]["owner"].is_null());

    let (status, body) = send(&app, "GET", "/workflows", None, None).await;
    assert_eq!(status, StatusCode::OK);
    let list = body["data"].as_array().unwrap();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["device_sn"], "SN-1001");
    assert_eq!(list[0]["current_node"], nodes::PRODUCTION_TEST_FAIL);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn first_node_full_cycle(pool: SqlitePool) {
    let app = app(&pool);
    let (process_id, task_id) = start_investigation(&app, "SN-1002").await;

    let url = |op: &str| action_url(&process_id, nodes::PRODUCTION_TEST_FAIL, &task_id, op);

    let (status, body) = send(&app, "POST", &url("assign"), Some("line_sup"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "assigned");
    assert_eq!(body["data"]["owner"], "line_sup");

    let (status, body) = send(
        &app,
        "POST",
        &url("execute"),
        Some("line_emp"),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "started");
    assert_eq!(body["data"]["data_submitted"], true);

    let (status, body) = send(
        &app,
        "POST",
        &url("approve"),
        Some("line_sup"),
        Some(json!({ "action": "approve" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "approved");
    assert_eq!(body["data"]["next_task"]["node"], nodes::FAE_INITIAL_RETEST);
    assert_eq!(body["data"]["process_finished"], false);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn reject_returns_task_for_rework(pool: SqlitePool) {
    let app = app(&pool);
    let (process_id, task_id) = start_investigation(&app, "SN-1003").await;
    let url = |op: &str| action_url(&process_id, nodes::PRODUCTION_TEST_FAIL, &task_id, op);

    send(&app, "POST", &url("assign"), Some("line_sup"), None).await;
    send(&app, "POST", &url("execute"), Some("line_emp"), Some(json!({}))).await;

    let (status, body) = send(
        &app,
        "POST",
        &url("approve"),
        Some("line_sup"),
        Some(json!({ "action": "reject" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["outcome"], "rejected");
    assert_eq!(body["data"]["task"]["status"], "assigned");
    assert_eq!(body["data"]["task"]["data_submitted"], false);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn approve_before_submission_is_a_conflict(pool: SqlitePool) {
    let app = app(&pool);
    let (process_id, task_id) = start_investigation(&app, "SN-1004").await;
    let url = |op: &str| action_url(&process_id, nodes::PRODUCTION_TEST_FAIL, &task_id, op);

    send(&app, "POST", &url("assign"), Some("line_sup"), None).await;

    let (status, body) = send(
        &app,
        "POST",
        &url("approve"),
        Some("line_sup"),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
}

// ============================================================================
// PERMISSION GATE 403 PAYLOADS
// ============================================================================

#[sqlx::test(migrations = "../db/migrations")]
async fn staff_cannot_approve(pool: SqlitePool) {
    let app = app(&pool);
    let (process_id, task_id) = start_investigation(&app, "SN-1005").await;
    let url = |op: &str| action_url(&process_id, nodes::PRODUCTION_TEST_FAIL, &task_id, op);

    send(&app, "POST", &url("assign"), Some("line_sup"), None).await;
    send(&app, "POST", &url("execute"), Some("line_emp"), Some(json!({}))).await;

    let (status, body) = send(
        &app,
        "POST",
        &url("approve"),
        Some("line_emp"),
        Some(json!({ "action": "approve" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "wrong_role");
    assert_eq!(body["success"], false);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn supervisor_of_wrong_department_cannot_assign(pool: SqlitePool) {
    let app = app(&pool);
    let (process_id, task_id) = start_investigation(&app, "SN-1006").await;

    let (status, body) = send(
        &app,
        "POST",
        &action_url(&process_id, nodes::PRODUCTION_TEST_FAIL, &task_id, "assign"),
        Some("fae_sup"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "wrong_department");
    assert_eq!(body["success"], false);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn anonymous_caller_is_denied_on_gated_route(pool: SqlitePool) {
    let app = app(&pool);
    let (process_id, task_id) = start_investigation(&app, "SN-1007").await;

    let (status, body) = send(
        &app,
        "POST",
        &action_url(&process_id, nodes::PRODUCTION_TEST_FAIL, &task_id, "execute"),
        None,
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "unauthenticated");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn gate_reports_missing_task(pool: SqlitePool) {
    let app = app(&pool);
    let (process_id, _) = start_investigation(&app, "SN-1008").await;

    let (status, body) = send(
        &app,
        "POST",
        &action_url(
            &process_id,
            nodes::PRODUCTION_TEST_FAIL,
            &uuid::Uuid::new_v4().to_string(),
            "assign",
        ),
        Some("line_sup"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "task_not_found");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn cancel_requires_supervisor_rank(pool: SqlitePool) {
    let app = app(&pool);
    let (process_id, task_id) = start_investigation(&app, "SN-1009").await;
    let url = action_url(&process_id, nodes::PRODUCTION_TEST_FAIL, &task_id, "cancel");

    let (status, body) = send(&app, "POST", &url, Some("line_emp"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["success"], false);

    let (status, body) = send(&app, "POST", &url, Some("line_sup"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelled");
}

// ============================================================================
// DASHBOARD PROJECTIONS
// ============================================================================

#[sqlx::test(migrations = "../db/migrations")]
async fn actions_endpoint_shows_placeholder_for_staff(pool: SqlitePool) {
    let app = app(&pool);
    let (process_id, task_id) = start_investigation(&app, "SN-1010").await;

    let (status, body) = send(
        &app,
        "GET",
        &format!("/workflows/{process_id}/tasks/{task_id}/actions"),
        Some("line_emp"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let actions = body["data"].as_array().unwrap();
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0]["label"], "待主管分配");
    assert!(actions[0]["href"].is_null());

    // Supervisors of the node's department get the live link instead.
    let (_, body) = send(
        &app,
        "GET",
        &format!("/workflows/{process_id}/tasks/{task_id}/actions"),
        Some("line_sup"),
        None,
    )
    .await;
    let actions = body["data"].as_array().unwrap();
    assert_eq!(actions[0]["label"], "Assign");
    assert!(actions[0]["href"].as_str().unwrap().ends_with("/assign"));
}

#[sqlx::test(migrations = "../db/migrations")]
async fn process_detail_carries_tasks_and_evidence(pool: SqlitePool) {
    let app = app(&pool);
    let (process_id, task_id) = start_investigation(&app, "SN-1011").await;
    let url = |op: &str| action_url(&process_id, nodes::PRODUCTION_TEST_FAIL, &task_id, op);

    send(&app, "POST", &url("assign"), Some("line_sup"), None).await;
    send(
        &app,
        "POST",
        &url("execute"),
        Some("line_emp"),
        Some(json!({ "attachment": "retest-log.txt" })),
    )
    .await;

    let (status, body) = send(&app, "GET", &format!("/workflows/{process_id}"), None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["device"]["sn"], "SN-1011");

    let tasks = body["data"]["tasks"].as_array().unwrap();
    // History row for the start node plus the one in-flight human task.
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0]["task"]["node"], nodes::START);
    assert_eq!(tasks[0]["task"]["status"], "done");
    assert_eq!(tasks[1]["task"]["node"], nodes::PRODUCTION_TEST_FAIL);
    let records = tasks[1]["operation_records"].as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["attachment"], "retest-log.txt");
}

#[sqlx::test(migrations = "../db/migrations")]
async fn stale_process_link_is_not_found(pool: SqlitePool) {
    let app = app(&pool);
    let (status, body) = send(
        &app,
        "GET",
        &format!("/workflows/{}", uuid::Uuid::new_v4()),
        None,
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[sqlx::test(migrations = "../db/migrations")]
async fn device_lookup_by_serial(pool: SqlitePool) {
    let app = app(&pool);
    start_investigation(&app, "SN-1012").await;

    let (status, body) = send(&app, "GET", "/devices/SN-1012", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["sn"], "SN-1012");

    let (status, _) = send(&app, "GET", "/devices/SN-MISSING", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, "GET", "/devices", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}
