use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use kiloclaw_core::models::{AppRecord, InstanceRecord};
use kiloclaw_core::{Error, Result};

use super::{AppStore, InstanceStore};

/// `sqlx`/SQLite persistence: one table per controller kind, one row per
/// user, the record stored as a JSON column (spec §6 "schema uses defaults so
/// fields added later parse old records" — `serde(default)` on every record
/// field satisfies that, and a JSON column sidesteps hand-written migrations
/// per field).
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// A deserialize failure on a non-empty row is logged and treated as a fresh
/// record — fail-safe, not fail-closed, per spec §6 (the reconciler rediscovers
/// state via metadata recovery).
fn parse_or_default<T: Default + serde::de::DeserializeOwned>(user_id: &str, kind: &str, raw: &str) -> T {
    match serde_json::from_str(raw) {
        Ok(record) => record,
        Err(e) => {
            tracing::warn!(
                user_id,
                kind,
                error = %e,
                "failed to deserialize persisted record, treating as fresh"
            );
            T::default()
        }
    }
}

impl AppStore for SqliteStore {
    async fn load_app(&self, user_id: &str) -> Result<AppRecord> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT data FROM app_records WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::Storage(e.to_string()))?;

        Ok(match row {
            Some((data,)) => parse_or_default(user_id, "app", &data),
            None => AppRecord::default(),
        })
    }

    async fn save_app(&self, user_id: &str, record: &AppRecord) -> Result<()> {
        let data = serde_json::to_string(record).map_err(|e| Error::Storage(e.to_string()))?;
        sqlx::query(
            "INSERT INTO app_records (user_id, app_name, data) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET app_name = excluded.app_name, data = excluded.data",
        )
        .bind(user_id)
        .bind(record.app_name.as_deref())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    async fn delete_app(&self, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM app_records WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }
}

impl InstanceStore for SqliteStore {
    async fn load_instance(&self, user_id: &str) -> Result<InstanceRecord> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT data FROM instance_records WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::Storage(e.to_string()))?;

        Ok(match row {
            Some((data,)) => parse_or_default(user_id, "instance", &data),
            None => InstanceRecord::default(),
        })
    }

    async fn save_instance(&self, user_id: &str, record: &InstanceRecord) -> Result<()> {
        let data = serde_json::to_string(record).map_err(|e| Error::Storage(e.to_string()))?;
        sqlx::query(
            "INSERT INTO instance_records (user_id, status, data) VALUES (?, ?, ?)
             ON CONFLICT(user_id) DO UPDATE SET status = excluded.status, data = excluded.data",
        )
        .bind(user_id)
        .bind(serde_json::to_string(&record.status).unwrap_or_default())
        .bind(data)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    async fn delete_instance(&self, user_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM instance_records WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }
}
