use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool, Type};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Active,
    Finished,
    Cancelled,
}

/// One end-to-end investigation of a single device.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Process {
    pub id: Uuid,
    pub device_id: Uuid,
    pub status: ProcessStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// List-page projection: process joined with its device and current node.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ProcessSummary {
    pub id: Uuid,
    pub device_sn: String,
    pub status: ProcessStatus,
    pub current_node: Option<String>,
    pub created_at: DateTime<Utc>,
}

const PROCESS_COLUMNS: &str = "id, device_id, status, created_at, finished_at, updated_at";

impl Process {
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Process>(&format!(
            "SELECT {PROCESS_COLUMNS} FROM processes WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_active_by_device<'e, E>(
        executor: E,
        device_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Process>(&format!(
            "SELECT {PROCESS_COLUMNS} FROM processes WHERE device_id = ? AND status = 'active'"
        ))
        .bind(device_id)
        .fetch_optional(executor)
        .await
    }

    pub async fn list_summaries(pool: &SqlitePool) -> Result<Vec<ProcessSummary>, sqlx::Error> {
        sqlx::query_as::<_, ProcessSummary>(
            r#"SELECT p.id, d.sn AS device_sn, p.status, p.created_at,
                      (SELECT t.node FROM tasks t
                        WHERE t.process_id = p.id
                        ORDER BY t.created_at DESC, t.rowid DESC LIMIT 1) AS current_node
               FROM processes p
               JOIN devices d ON d.id = p.device_id
               ORDER BY p.created_at DESC"#,
        )
        .fetch_all(pool)
        .await
    }

    pub async fn create<'e, E>(
        executor: E,
        device_id: Uuid,
        process_id: Uuid,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        sqlx::query_as::<_, Process>(&format!(
            r#"INSERT INTO processes (id, device_id, status, created_at, finished_at, updated_at)
               VALUES (?, ?, ?, ?, NULL, ?)
               RETURNING {PROCESS_COLUMNS}"#
        ))
        .bind(process_id)
        .bind(device_id)
        .bind(ProcessStatus::Active)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    /// Guarded terminal write; returns affected rows so a lost race is visible.
    pub async fn try_finish<'e, E>(executor: E, id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        let result = sqlx::query(
            "UPDATE processes SET status = 'finished', finished_at = ?, updated_at = ?
             WHERE id = ? AND status = 'active'",
        )
        .bind(now)
        .bind(now)
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
            "UPDATE processes SET status = 'cancelled', finished_at = ?, updated_at = ?
             WHERE id = ? AND status = 'active'",
        )
        .bind(now)
        .bind(now)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }
}
