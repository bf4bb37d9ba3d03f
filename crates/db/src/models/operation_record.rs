use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite};
use uuid::Uuid;

/// Append-only log of a physical action taken on the device during a task.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: Uuid,
    pub process_id: Uuid,
    pub task_id: Uuid,
    pub action: String,
    pub actor: String,
    pub attachment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOperationRecord {
    pub process_id: Uuid,
    pub task_id: Uuid,
    pub action: String,
    pub actor: String,
    pub attachment: Option<String>,
}

const RECORD_COLUMNS: &str = "id, process_id, task_id, action, actor, attachment, created_at";

impl OperationRecord {
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, OperationRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM operation_records WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_task<'e, E>(
        executor: E,
        task_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, OperationRecord>(&format!(
            "SELECT {RECORD_COLUMNS} FROM operation_records WHERE task_id = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(task_id)
        .fetch_all(executor)
        .await
    }

    pub async fn create<'e, E>(
        executor: E,
        data: &CreateOperationRecord,
        record_id: Uuid,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, OperationRecord>(&format!(
            r#"INSERT INTO operation_records (id, process_id, task_id, action, actor, attachment, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               RETURNING {RECORD_COLUMNS}"#
        ))
        .bind(record_id)
        .bind(data.process_id)
        .bind(data.task_id)
        .bind(&data.action)
        .bind(&data.actor)
        .bind(&data.attachment)
        .bind(Utc::now())
        .fetch_one(executor)
        .await
    }
}
