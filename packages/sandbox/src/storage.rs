// ABOUTME: Storage layer for sandbox session records
// ABOUTME: One row per owner in SQLite, holding the container reference, status and activity time

use crate::profile::{OwnerId, ResourceProfile};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Invalid status: {0}")]
    InvalidStatus(String),
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Running,
    Stopped,
    Removed,
}

impl SandboxStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Removed => "removed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(Self::Running),
            "stopped" => Ok(Self::Stopped),
            "removed" => Ok(Self::Removed),
            _ => Err(StorageError::InvalidStatus(s.to_string())),
        }
    }
}

/// Persisted sandbox session. The runtime is authoritative; `status` is a
/// cache reconciled whenever the manager reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxSession {
    pub owner_id: OwnerId,
    pub container_ref: Option<String>,
    pub container_name: String,
    pub status: SandboxStatus,
    pub mounted_volume_path: String,
    pub workspace_path: String,
    /// Profile the container was created with
    pub resource_profile: ResourceProfile,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: Option<DateTime<Utc>>,
}

pub struct SessionStorage {
    pool: SqlitePool,
}

impl SessionStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url` and apply migrations
    pub async fn connect(url: &str) -> Result<Self> {
        let in_memory = url.contains(":memory:");
        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to an in-memory database is a separate database,
        // so keep exactly one alive for the life of the pool
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;

        let storage = Self::new(pool);
        storage.migrate().await?;
        Ok(storage)
    }

    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ========================================================================
    // SESSION OPERATIONS
    // ========================================================================

    pub async fn get(&self, owner_id: &OwnerId) -> Result<Option<SandboxSession>> {
        let row = sqlx::query("SELECT * FROM sandbox_sessions WHERE owner_id = ?")
            .bind(owner_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| self.row_to_session(row)).transpose()
    }

    /// Insert the owner's session, replacing any previous row
    pub async fn upsert(&self, session: &SandboxSession) -> Result<()> {
        let profile = serde_json::to_string(&session.resource_profile)?;

        sqlx::query(
            r#"
            INSERT INTO sandbox_sessions (
                owner_id, container_ref, container_name, status,
                mounted_volume_path, workspace_path, resource_profile,
                created_at, last_activity_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(owner_id) DO UPDATE SET
                container_ref = excluded.container_ref,
                container_name = excluded.container_name,
                status = excluded.status,
                mounted_volume_path = excluded.mounted_volume_path,
                workspace_path = excluded.workspace_path,
                resource_profile = excluded.resource_profile,
                created_at = excluded.created_at,
                last_activity_at = excluded.last_activity_at
            "#,
        )
        .bind(session.owner_id.as_str())
        .bind(&session.container_ref)
        .bind(&session.container_name)
        .bind(session.status.as_str())
        .bind(&session.mounted_volume_path)
        .bind(&session.workspace_path)
        .bind(profile)
        .bind(session.created_at.to_rfc3339())
        .bind(session.last_activity_at.map(|d| d.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        debug!(
            "Stored session for {} ({})",
            session.owner_id,
            session.status.as_str()
        );
        Ok(())
    }

    /// Set the status unconditionally. Moving to Running also counts as activity.
    pub async fn update_status(&self, owner_id: &OwnerId, status: SandboxStatus) -> Result<()> {
        let result = if status == SandboxStatus::Running {
            sqlx::query(
                "UPDATE sandbox_sessions SET status = ?, last_activity_at = ? WHERE owner_id = ?",
            )
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(owner_id.as_str())
            .execute(&self.pool)
            .await?
        } else {
            sqlx::query("UPDATE sandbox_sessions SET status = ? WHERE owner_id = ?")
                .bind(status.as_str())
                .bind(owner_id.as_str())
                .execute(&self.pool)
                .await?
        };

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(owner_id.to_string()));
        }

        Ok(())
    }

    /// Move from `expected` to `new` atomically. Returns false when the row is
    /// missing or no longer in `expected`.
    pub async fn compare_and_set_status(
        &self,
        owner_id: &OwnerId,
        expected: SandboxStatus,
        new: SandboxStatus,
    ) -> Result<bool> {
        let result =
            sqlx::query("UPDATE sandbox_sessions SET status = ? WHERE owner_id = ? AND status = ?")
                .bind(new.as_str())
                .bind(owner_id.as_str())
                .bind(expected.as_str())
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn touch(&self, owner_id: &OwnerId, at: DateTime<Utc>) -> Result<()> {
        let result =
            sqlx::query("UPDATE sandbox_sessions SET last_activity_at = ? WHERE owner_id = ?")
                .bind(at.to_rfc3339())
                .bind(owner_id.as_str())
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(owner_id.to_string()));
        }

        Ok(())
    }

    pub async fn list(&self, status: Option<SandboxStatus>) -> Result<Vec<SandboxSession>> {
        let rows = match status {
            Some(status) => {
                sqlx::query("SELECT * FROM sandbox_sessions WHERE status = ? ORDER BY owner_id")
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM sandbox_sessions ORDER BY owner_id")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.into_iter()
            .map(|row| self.row_to_session(row))
            .collect()
    }

    /// Hard-delete the owner's row. Returns whether a row existed.
    pub async fn purge(&self, owner_id: &OwnerId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sandbox_sessions WHERE owner_id = ?")
            .bind(owner_id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    fn row_to_session(&self, row: sqlx::sqlite::SqliteRow) -> Result<SandboxSession> {
        Ok(SandboxSession {
            owner_id: OwnerId::from(row.get::<String, _>("owner_id")),
            container_ref: row.get("container_ref"),
            container_name: row.get("container_name"),
            status: SandboxStatus::from_str(&row.get::<String, _>("status"))?,
            mounted_volume_path: row.get("mounted_volume_path"),
            workspace_path: row.get("workspace_path"),
            resource_profile: serde_json::from_str(&row.get::<String, _>("resource_profile"))?,
            created_at: parse_timestamp(&row.get::<String, _>("created_at"))?,
            last_activity_at: row
                .get::<Option<String>, _>("last_activity_at")
                .map(|s| parse_timestamp(&s))
                .transpose()?,
        })
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StorageError::InvalidTimestamp(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    async fn setup() -> SessionStorage {
        SessionStorage::connect("sqlite::memory:").await.unwrap()
    }

    fn session(owner: &str, status: SandboxStatus) -> SandboxSession {
        let owner_id = OwnerId::from(owner);
        SandboxSession {
            container_ref: Some(format!("ctr-{}", owner_id.slug())),
            container_name: format!("codenest-{}", owner_id.slug()),
            status,
            mounted_volume_path: format!("/srv/volumes/{}_volume", owner_id.slug()),
            workspace_path: format!("/srv/workspaces/{}", owner),
            resource_profile: ResourceProfile::default(),
            created_at: Utc::now(),
            last_activity_at: Some(Utc::now()),
            owner_id,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let storage = setup().await;
        let record = session("alice/42", SandboxStatus::Running);

        storage.upsert(&record).await.unwrap();
        let loaded = storage.get(&record.owner_id).await.unwrap().unwrap();

        assert_eq!(loaded.container_ref, record.container_ref);
        assert_eq!(loaded.container_name, "codenest-alice_2f_42");
        assert_eq!(loaded.status, SandboxStatus::Running);
        assert_eq!(loaded.resource_profile, ResourceProfile::default());
        assert_eq!(
            loaded.created_at.timestamp_millis(),
            record.created_at.timestamp_millis()
        );
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let storage = setup().await;
        assert!(storage.get(&OwnerId::user("nobody")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_row() {
        let storage = setup().await;
        let mut record = session("alice", SandboxStatus::Removed);
        storage.upsert(&record).await.unwrap();

        record.container_ref = Some("ctr-new".to_string());
        record.status = SandboxStatus::Running;
        storage.upsert(&record).await.unwrap();

        let all = storage.list(None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].container_ref.as_deref(), Some("ctr-new"));
        assert_eq!(all[0].status, SandboxStatus::Running);
    }

    #[tokio::test]
    async fn test_update_status_missing_owner() {
        let storage = setup().await;
        let result = storage
            .update_status(&OwnerId::user("ghost"), SandboxStatus::Stopped)
            .await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_update_status_to_running_stamps_activity() {
        let storage = setup().await;
        let mut record = session("alice", SandboxStatus::Stopped);
        record.last_activity_at = None;
        storage.upsert(&record).await.unwrap();

        storage
            .update_status(&record.owner_id, SandboxStatus::Running)
            .await
            .unwrap();

        let loaded = storage.get(&record.owner_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SandboxStatus::Running);
        assert!(loaded.last_activity_at.is_some());
    }

    #[tokio::test]
    async fn test_compare_and_set_status_only_once() {
        let storage = setup().await;
        let record = session("alice", SandboxStatus::Running);
        storage.upsert(&record).await.unwrap();

        let first = storage
            .compare_and_set_status(&record.owner_id, SandboxStatus::Running, SandboxStatus::Stopped)
            .await
            .unwrap();
        let second = storage
            .compare_and_set_status(&record.owner_id, SandboxStatus::Running, SandboxStatus::Stopped)
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        let loaded = storage.get(&record.owner_id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SandboxStatus::Stopped);
    }

    #[tokio::test]
    async fn test_touch_updates_last_activity() {
        let storage = setup().await;
        let mut record = session("alice", SandboxStatus::Running);
        record.last_activity_at = None;
        storage.upsert(&record).await.unwrap();

        let at = Utc::now();
        storage.touch(&record.owner_id, at).await.unwrap();

        let loaded = storage.get(&record.owner_id).await.unwrap().unwrap();
        assert_eq!(
            loaded.last_activity_at.map(|d| d.timestamp_millis()),
            Some(at.timestamp_millis())
        );
        assert!(matches!(
            storage.touch(&OwnerId::user("ghost"), at).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let storage = setup().await;
        storage.upsert(&session("alice", SandboxStatus::Running)).await.unwrap();
        storage.upsert(&session("bob", SandboxStatus::Stopped)).await.unwrap();
        storage.upsert(&session("carol", SandboxStatus::Running)).await.unwrap();

        let running = storage.list(Some(SandboxStatus::Running)).await.unwrap();
        let owners: Vec<&str> = running.iter().map(|s| s.owner_id.as_str()).collect();
        assert_eq!(owners, vec!["alice", "carol"]);
        assert_eq!(storage.list(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_purge() {
        let storage = setup().await;
        let record = session("alice", SandboxStatus::Removed);
        storage.upsert(&record).await.unwrap();

        assert!(storage.purge(&record.owner_id).await.unwrap());
        assert!(!storage.purge(&record.owner_id).await.unwrap());
        assert!(storage.get(&record.owner_id).await.unwrap().is_none());
    }

    #[test]
    fn test_status_round_trip_strings() {
        assert_eq!(SandboxStatus::from_str("stopped").unwrap(), SandboxStatus::Stopped);
        assert!(matches!(
            SandboxStatus::from_str("paused"),
            Err(StorageError::InvalidStatus(_))
        ));
    }
}
