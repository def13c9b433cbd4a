//! 快照存储契约与内存实现

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use tm_core::{Result, TagMeshError};

/// 快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// 所属实体键 (租户)
    pub key: String,
    /// 快照版本, 每次写入递增, 首次写入为 1
    pub version: u64,
    /// 快照时间
    pub timestamp: DateTime<Utc>,
    /// 状态数据
    pub state: serde_json::Value,
}

impl Snapshot {
    /// 创建新快照
    pub fn new(key: impl Into<String>, version: u64, state: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            version,
            timestamp: Utc::now(),
            state,
        }
    }
}

/// 持久化状态存储
///
/// 每个键只保留最新快照。`persist` 的 `expected_version` 为 `Some(v)` 时，
/// 仅当当前存储版本等于 `v` (不存在视为 0) 才写入，否则返回
/// [`TagMeshError::PersistenceConflict`]; 为 `None` 时跳过版本检查。
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    /// 加载最新快照
    async fn load_latest(&self, key: &str) -> Result<Option<Snapshot>>;

    /// 覆盖写入快照
    async fn persist(&self, snapshot: Snapshot, expected_version: Option<u64>) -> Result<()>;

    /// 删除该键的全部状态
    async fn delete_all(&self, key: &str) -> Result<()>;
}

/// 存储操作计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub loads: u64,
    pub persists: u64,
    pub deletes: u64,
}

/// 内存快照存储
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: RwLock<HashMap<String, Snapshot>>,
    loads: AtomicU64,
    persists: AtomicU64,
    deletes: AtomicU64,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取操作计数
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            loads: self.loads.load(Ordering::Relaxed),
            persists: self.persists.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
        }
    }

    /// 获取当前快照 (不计入统计)
    pub async fn peek(&self, key: &str) -> Option<Snapshot> {
        self.snapshots.read().await.get(key).cloned()
    }

    /// 获取快照数量
    pub async fn count(&self) -> usize {
        self.snapshots.read().await.len()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load_latest(&self, key: &str) -> Result<Option<Snapshot>> {
        self.loads.fetch_add(1, Ordering::Relaxed);
        Ok(self.snapshots.read().await.get(key).cloned())
    }

    async fn persist(&self, snapshot: Snapshot, expected_version: Option<u64>) -> Result<()> {
        self.persists.fetch_add(1, Ordering::Relaxed);

        let mut snapshots = self.snapshots.write().await;
        let actual = snapshots.get(&snapshot.key).map_or(0, |s| s.version);

        if let Some(expected) = expected_version {
            if expected != actual {
                return Err(TagMeshError::PersistenceConflict {
                    key: snapshot.key,
                    expected,
                    actual,
                });
            }
        }

        snapshots.insert(snapshot.key.clone(), snapshot);
        Ok(())
    }

    async fn delete_all(&self, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::Relaxed);
        self.snapshots.write().await.remove(key);
        Ok(())
    }
}
