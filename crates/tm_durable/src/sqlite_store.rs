//! SQLite 快照存储

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use tm_core::{Result, TagMeshError};

use crate::snapshot::{Snapshot, SnapshotStore};

/// SQLite 存储配置
#[derive(Debug, Clone)]
pub struct SqliteStoreConfig {
    /// 数据库路径
    pub database_path: String,
    /// 是否启用 WAL
    pub enable_wal: bool,
    /// 连接池大小
    pub max_connections: u32,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            database_path: "tagmesh.db".to_string(),
            enable_wal: true,
            max_connections: 4,
        }
    }
}

fn db_err(e: sqlx::Error) -> TagMeshError {
    TagMeshError::Database(e.to_string())
}

/// SQLite 快照存储, 每个键一行
pub struct SqliteSnapshotStore {
    config: SqliteStoreConfig,
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    /// 连接数据库并建表
    pub async fn connect(config: SqliteStoreConfig) -> Result<Self> {
        let journal_mode = if config.enable_wal {
            SqliteJournalMode::Wal
        } else {
            SqliteJournalMode::Delete
        };

        let options = SqliteConnectOptions::new()
            .filename(&config.database_path)
            .create_if_missing(true)
            .journal_mode(journal_mode);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(db_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS tag_snapshots (
                owner_key TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                state TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(db_err)?;

        tracing::info!("Snapshot store opened at {}", config.database_path);
        Ok(Self { config, pool })
    }

    /// 从路径打开
    pub async fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let config = SqliteStoreConfig {
            database_path: path.as_ref().to_string_lossy().to_string(),
            ..Default::default()
        };
        Self::connect(config).await
    }

    pub fn config(&self) -> &SqliteStoreConfig {
        &self.config
    }

    async fn current_version(&self, key: &str) -> Result<u64> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT version FROM tag_snapshots WHERE owner_key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        Ok(row.map_or(0, |(version,)| version as u64))
    }

    /// 获取快照数量
    pub async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tag_snapshots")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(count as u64)
    }

    /// 关闭连接池
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn load_latest(&self, key: &str) -> Result<Option<Snapshot>> {
        let row: Option<(i64, String, String)> = sqlx::query_as(
            "SELECT version, state, updated_at FROM tag_snapshots WHERE owner_key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        let Some((version, state, updated_at)) = row else {
            return Ok(None);
        };

        let timestamp = DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| TagMeshError::Database(e.to_string()))?
            .with_timezone(&Utc);

        Ok(Some(Snapshot {
            key: key.to_string(),
            version: version as u64,
            timestamp,
            state: serde_json::from_str(&state)?,
        }))
    }

    async fn persist(&self, snapshot: Snapshot, expected_version: Option<u64>) -> Result<()> {
        let state = serde_json::to_string(&snapshot.state)?;
        let updated_at = snapshot.timestamp.to_rfc3339();
        let version = snapshot.version as i64;

        let query = match expected_version {
            None => sqlx::query(
                "INSERT INTO tag_snapshots (owner_key, version, state, updated_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(owner_key) DO UPDATE SET
                    version = excluded.version,
                    state = excluded.state,
                    updated_at = excluded.updated_at",
            )
            .bind(&snapshot.key)
            .bind(version)
            .bind(&state)
            .bind(&updated_at),
            Some(0) => sqlx::query(
                "INSERT INTO tag_snapshots (owner_key, version, state, updated_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(owner_key) DO NOTHING",
            )
            .bind(&snapshot.key)
            .bind(version)
            .bind(&state)
            .bind(&updated_at),
            Some(expected) => sqlx::query(
                "UPDATE tag_snapshots SET version = ?, state = ?, updated_at = ?
                 WHERE owner_key = ? AND version = ?",
            )
            .bind(version)
            .bind(&state)
            .bind(&updated_at)
            .bind(&snapshot.key)
            .bind(expected as i64),
        };

        let affected = query
            .execute(&self.pool)
            .await
            .map_err(db_err)?
            .rows_affected();

        match expected_version {
            Some(expected) if affected == 0 => Err(TagMeshError::PersistenceConflict {
                actual: self.current_version(&snapshot.key).await?,
                key: snapshot.key,
                expected,
            }),
            _ => Ok(()),
        }
    }

    async fn delete_all(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM tag_snapshots WHERE owner_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}
