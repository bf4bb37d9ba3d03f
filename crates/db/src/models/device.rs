use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, FromRow, Sqlite, SqlitePool};
use uuid::Uuid;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Device {
    pub id: Uuid,
    pub sn: String,
    pub project: Option<String>,
    pub hardware_version: Option<String>,
    pub software_version: Option<String>,
    pub config: Option<String>,
    pub fail_station: Option<String>,
    pub failure_mode: Option<String>,
    pub test_link: Option<String>,
    pub current_position: Option<String>,
    pub bug_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateDevice {
    pub sn: String,
    pub project: Option<String>,
    pub hardware_version: Option<String>,
    pub software_version: Option<String>,
    pub config: Option<String>,
    pub fail_station: Option<String>,
    pub failure_mode: Option<String>,
    pub test_link: Option<String>,
}

const DEVICE_COLUMNS: &str = r#"id, sn, project, hardware_version, software_version, config,
           fail_station, failure_mode, test_link, current_position, bug_ref,
           created_at, updated_at"#;

impl Device {
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(executor)
        .await
    }

    pub async fn find_by_sn<'e, E>(executor: E, sn: &str) -> Result<Option<Self>, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE sn = ?"
        ))
        .bind(sn)
        .fetch_optional(executor)
        .await
    }

    pub async fn list(pool: &SqlitePool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as::<_, Device>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices ORDER BY created_at DESC"
        ))
        .fetch_all(pool)
        .await
    }

    pub async fn create<'e, E>(
        executor: E,
        data: &CreateDevice,
        device_id: Uuid,
    ) -> Result<Self, sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        sqlx::query_as::<_, Device>(&format!(
            r#"INSERT INTO devices (id, sn, project, hardware_version, software_version, config,
                                    fail_station, failure_mode, test_link, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               RETURNING {DEVICE_COLUMNS}"#
        ))
        .bind(device_id)
        .bind(&data.sn)
        .bind(&data.project)
        .bind(&data.hardware_version)
        .bind(&data.software_version)
        .bind(&data.config)
        .bind(&data.fail_station)
        .bind(&data.failure_mode)
        .bind(&data.test_link)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await
    }

    /// Recorded when a retest submission moves the physical unit.
    pub async fn update_position<'e, E>(
        executor: E,
        id: Uuid,
        position: &str,
    ) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query("UPDATE devices SET current_position = ?, updated_at = ? WHERE id = ?")
            .bind(position)
            .bind(Utc::now())
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }

    pub async fn set_bug_ref<'e, E>(
        executor: E,
        id: Uuid,
        bug_ref: &str,
    ) -> Result<(), sqlx::Error>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        sqlx::query("UPDATE devices SET bug_ref = ?, updated_at = ? WHERE id = ?")
            .bind(bug_ref)
            .bind(Utc::now())
            .bind(id)
            .execute(executor)
            .await?;
        Ok(())
    }
}
