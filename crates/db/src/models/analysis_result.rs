use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite};
use uuid::Uuid;

/// Analyst verdict attached to a task. `result` is tri-state: NULL means the
/// analyst recorded notes without committing to pass/fail, and decision nodes
/// treat it the same as "no result yet".
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: Uuid,
    pub process_id: Uuid,
    pub task_id: Uuid,
    pub operation_id: Option<Uuid>,
    pub actor: String,
    pub analysis_notes: String,
    pub result: Option<bool>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateAnalysisResult {
    pub process_id: Uuid,
    pub task_id: Uuid,
    pub operation_id: Option<Uuid>,
    pub actor: String,
    pub analysis_notes: String,
    pub result: Option<bool>,
}

const RESULT_COLUMNS: &str =
    "id, process_id, task_id, operation_id, actor, analysis_notes, result, created_at";

impl AnalysisResult {
    pub async fn find_by_task<'e, E>(
        executor: E,
        task_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, AnalysisResult>(&format!(
            "SELECT {RESULT_COLUMNS} FROM analysis_results WHERE task_id = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(task_id)
        .fetch_all(executor)
        .await
    }

    pub async fn create<'e, E>(
        executor: E,
        data: &CreateAnalysisResult,
        result_id: Uuid,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, AnalysisResult>(&format!(
            r#"INSERT INTO analysis_results (id, process_id, task_id, operation_id, actor,
                                             analysis_notes, result, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               RETURNING {RESULT_COLUMNS}"#
        ))
        .bind(result_id)
        .bind(data.process_id)
        .bind(data.task_id)
        .bind(data.operation_id)
        .bind(&data.actor)
        .bind(&data.analysis_notes)
        .bind(data.result)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }

    /// Newest verdict recorded for a node within a process. Outer `None`
    /// means the node has no analysis rows at all; `Some(None)` means the
    /// newest row left the verdict open.
    pub async fn latest_result_for_node<'e, E>(
        executor: E,
        process_id: Uuid,
        node: &str,
    ) -> Result<Option<Option<bool>>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let row: Option<(Option<bool>,)> = sqlx::query_as(
            r#"SELECT ar.result FROM analysis_results ar
               JOIN tasks t ON t.id = ar.task_id
               WHERE ar.process_id = ? AND t.node = ?
               ORDER BY ar.created_at DESC, ar.rowid DESC LIMIT 1"#,
        )
        .bind(process_id)
        .bind(node)
        .fetch_optional(executor)
        .await?;
        Ok(row.map(|r| r.0))
    }
}
