use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, Type};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    New,
    Assigned,
    Started,
    Done,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Cancelled)
    }
}

/// One visit to a flow node within a process. Only the activation engine
/// writes these rows; every status change goes through a guarded update so
/// two racing requests cannot both take the same transition.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub process_id: Uuid,
    pub node: String,
    pub status: TaskStatus,
    pub owner: Option<String>,
    pub data_submitted: bool,
    pub created_at: DateTime<Utc>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

const TASK_COLUMNS: &str = r#"id, process_id, node, status, owner, data_submitted,
           created_at, assigned_at, started_at, finished_at, updated_at"#;

impl Task {
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id)
            .fetch_optional(executor)
            .await
    }

    pub async fn find_by_process<'e, E>(
        executor: E,
        process_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE process_id = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(process_id)
        .fetch_all(executor)
        .await
    }

    /// The single task still in flight for a process, if any.
    pub async fn find_active_by_process<'e, E>(
        executor: E,
        process_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Task>(&format!(
            r#"SELECT {TASK_COLUMNS} FROM tasks
               WHERE process_id = ? AND status IN ('new', 'assigned', 'started')
               ORDER BY created_at DESC, rowid DESC LIMIT 1"#
        ))
        .bind(process_id)
        .fetch_optional(executor)
        .await
    }

    pub async fn create<'e, E>(
        executor: E,
        process_id: Uuid,
        node: &str,
        status: TaskStatus,
        task_id: Uuid,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        let finished_at = status.is_terminal().then_some(now);
        sqlx::query_as::<_, Task>(&format!(
            r#"INSERT INTO tasks (id, process_id, node, status, owner, data_submitted,
                                  created_at, assigned_at, started_at, finished_at, updated_at)
               VALUES (?, ?, ?, ?, NULL, 0, ?, NULL, NULL, ?, ?)
               RETURNING {TASK_COLUMNS}"#
        ))
        .bind(task_id)
        .bind(process_id)
        .bind(node)
        .bind(status)
        .bind(now)
        .bind(finished_at)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    pub async fn try_assign<'e, E>(
        executor: E,
        id: Uuid,
        owner: &str,
    ) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE tasks SET status = 'assigned', owner = ?, assigned_at = ?, updated_at = ?
             WHERE id = ? AND status = 'new'",
        )
        .bind(owner)
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn try_unassign<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'new', owner = NULL, assigned_at = NULL, updated_at = ?
             WHERE id = ? AND status = 'assigned'",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Re-entrant: a started task may restart data entry after a rejection,
    /// but never while unreviewed data is sitting on it.
    pub async fn try_start<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        let result = sqlx::query(
            r#"UPDATE tasks SET status = 'started', started_at = COALESCE(started_at, ?), updated_at = ?
               WHERE id = ? AND status IN ('assigned', 'started') AND data_submitted = 0"#,
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn mark_data_submitted<'e, E>(executor: E, id: Uuid) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query("UPDATE tasks SET data_submitted = 1, updated_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn try_complete<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE tasks SET status = 'done', finished_at = ?, updated_at = ?
             WHERE id = ? AND status = 'started' AND data_submitted = 1",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Rework: hand the task back to its assignee with the submission voided.
    pub async fn try_reject<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            "UPDATE tasks SET status = 'assigned', data_submitted = 0, updated_at = ?
             WHERE id = ? AND status = 'started'",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn try_cancel<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE tasks SET status = 'cancelled', finished_at = ?, updated_at = ?
             WHERE id = ? AND status IN ('new', 'assigned', 'started')",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}
