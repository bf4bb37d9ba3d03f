use std::{path::Path, str::FromStr};

use sqlx::{sqlite::SqliteConnectOptions, Error, Pool, Sqlite, SqlitePool};
use utils::assets::asset_dir;

pub mod models;

#[derive(Clone)]
pub struct DBService {
    pub pool: Pool<Sqlite>,
}

impl DBService {
    /// Open (or create) the database at the default asset location.
    pub async fn new() -> Result<DBService, Error> {
        let path = asset_dir().join("db.sqlite");
        Self::new_with_path(&path).await
    }

    /// Open (or create) the database at an explicit path.
    pub async fn new_with_path(path: &Path) -> Result<DBService, Error> {
        let database_url = format!("sqlite://{}", path.to_string_lossy());
        let options = SqliteConnectOptions::from_str(&database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePool::connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(DBService { pool })
    }

    /// Wrap an existing pool (tests inject theirs via `#[sqlx::test]`).
    pub fn from_pool(pool: SqlitePool) -> DBService {
        DBService { pool }
    }
}
