//! Tag Registry Actor - 单租户标签注册表状态机
//!
//! 每个变更先作用于状态副本，快照写入成功后才替换内存状态。
//! 因此写入失败 (或调用方在写入确认前放弃等待) 都不会让内存状态
//! 偏离最后一次成功持久化的快照。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tm_core::{RegistryState, Result, TagId, TagMeshError, TagSet};

use crate::snapshot::{Snapshot, SnapshotStore};

/// Actor 状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorState {
    /// 尚未加载状态
    Unloaded,
    /// 状态已加载，可处理请求
    Active,
}

enum Phase {
    Unloaded,
    Active {
        state: RegistryState,
        /// 最后一次成功持久化的快照版本, 0 表示存储中不存在快照
        version: u64,
    },
}

/// 标签注册表 Actor
pub struct TagRegistryActor {
    key: String,
    store: Arc<dyn SnapshotStore>,
    phase: Phase,
}

impl TagRegistryActor {
    /// 创建未激活的 Actor
    pub fn new(key: impl Into<String>, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            key: key.into(),
            store,
            phase: Phase::Unloaded,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// 获取当前状态
    pub fn state(&self) -> ActorState {
        match self.phase {
            Phase::Unloaded => ActorState::Unloaded,
            Phase::Active { .. } => ActorState::Active,
        }
    }

    /// 已持久化的快照版本
    pub fn version(&self) -> Option<u64> {
        match self.phase {
            Phase::Unloaded => None,
            Phase::Active { version, .. } => Some(version),
        }
    }

    /// 激活: 从存储加载最新快照, 不存在时从空集合开始
    pub async fn activate(&mut self) -> Result<()> {
        if let Phase::Active { .. } = self.phase {
            return Ok(());
        }

        let snapshot = self
            .store
            .load_latest(&self.key)
            .await
            .map_err(|e| self.activation_error(e.to_string()))?;

        let (state, version) = match snapshot {
            Some(snapshot) => {
                let state: RegistryState = serde_json::from_value(snapshot.state)
                    .map_err(|e| self.activation_error(e.to_string()))?;
                (state, snapshot.version)
            }
            None => (RegistryState::default(), 0),
        };

        tracing::info!(
            "Tag registry '{}' activated at version {} with {} tags",
            self.key,
            version,
            state.tags.len()
        );
        self.phase = Phase::Active { state, version };
        Ok(())
    }

    /// 归一化标签名称, 返回新增名称 -> 标签 ID
    pub async fn normalize_tags(
        &mut self,
        names: &HashSet<String>,
        ids_to_remove: &HashSet<TagId>,
    ) -> Result<HashMap<String, TagId>> {
        let mut next = self.current()?.clone();
        let outcome = next.tags.normalize(names, ids_to_remove);

        if outcome.changed {
            self.commit(next).await?;
        }
        Ok(outcome.tag_ids)
    }

    pub fn get_tag_ids(&self, names: &HashSet<String>) -> Result<HashMap<String, TagId>> {
        Ok(self.current()?.tags.get_tag_ids(names))
    }

    pub fn denormalize_tags(&self, ids: &HashSet<TagId>) -> Result<HashMap<TagId, String>> {
        Ok(self.current()?.tags.denormalize(ids))
    }

    /// 名称 -> 计数
    pub fn get_tags(&self) -> Result<HashMap<String, u64>> {
        Ok(self.current()?.tags.counts())
    }

    /// 导出完整集合 (副本, 调用方只读使用)
    pub fn get_exportable_tags(&self) -> Result<TagSet> {
        Ok(self.current()?.tags.clone())
    }

    /// 整体替换标签集合, 不做合并
    pub async fn rebuild(&mut self, tags: TagSet) -> Result<()> {
        self.current()?;

        let count = tags.len();
        self.commit(RegistryState::new(tags)).await?;

        tracing::info!("Tag registry '{}' rebuilt with {} tags", self.key, count);
        Ok(())
    }

    /// 清空状态并删除存储中的全部快照
    pub async fn clear(&mut self) -> Result<()> {
        self.current()?;

        self.store.delete_all(&self.key).await.map_err(|e| {
            tracing::warn!("Failed to clear tag registry '{}': {}", self.key, e);
            self.persistence_error(e)
        })?;

        self.phase = Phase::Active {
            state: RegistryState::default(),
            version: 0,
        };
        tracing::info!("Tag registry '{}' cleared", self.key);
        Ok(())
    }

    fn current(&self) -> Result<&RegistryState> {
        match &self.phase {
            Phase::Active { state, .. } => Ok(state),
            Phase::Unloaded => Err(TagMeshError::NotActivated(self.key.clone())),
        }
    }

    async fn commit(&mut self, next: RegistryState) -> Result<()> {
        let Phase::Active { version, .. } = self.phase else {
            return Err(TagMeshError::NotActivated(self.key.clone()));
        };

        let snapshot = Snapshot::new(self.key.clone(), version + 1, serde_json::to_value(&next)?);

        if let Err(e) = self.store.persist(snapshot, Some(version)).await {
            tracing::warn!(
                "Snapshot of '{}' at version {} rejected: {}",
                self.key,
                version + 1,
                e
            );
            return Err(self.persistence_error(e));
        }

        tracing::debug!(
            "Snapshot of '{}' persisted at version {} ({} tags)",
            self.key,
            version + 1,
            next.tags.len()
        );
        self.phase = Phase::Active {
            state: next,
            version: version + 1,
        };
        Ok(())
    }

    fn activation_error(&self, reason: String) -> TagMeshError {
        TagMeshError::Activation {
            key: self.key.clone(),
            reason,
        }
    }

    fn persistence_error(&self, e: TagMeshError) -> TagMeshError {
        match e {
            conflict @ TagMeshError::PersistenceConflict { .. } => conflict,
            other => TagMeshError::Persistence {
                key: self.key.clone(),
                reason: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use async_trait::async_trait;
    use tm_core::Tag;
    use tokio_test::{assert_err, assert_ok};

    use super::*;
    use crate::snapshot::MemorySnapshotStore;

    /// 可注入写入失败的存储
    #[derive(Default)]
    struct FlakyStore {
        inner: MemorySnapshotStore,
        fail_writes: AtomicBool,
        fail_loads: AtomicBool,
    }

    #[async_trait]
    impl SnapshotStore for FlakyStore {
        async fn load_latest(&self, key: &str) -> Result<Option<Snapshot>> {
            if self.fail_loads.load(Ordering::SeqCst) {
                return Err(TagMeshError::Database("store unreachable".to_string()));
            }
            self.inner.load_latest(key).await
        }

        async fn persist(&self, snapshot: Snapshot, expected_version: Option<u64>) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(TagMeshError::Database("disk full".to_string()));
            }
            self.inner.persist(snapshot, expected_version).await
        }

        async fn delete_all(&self, key: &str) -> Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(TagMeshError::Database("disk full".to_string()));
            }
            self.inner.delete_all(key).await
        }
    }

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn values(map: &HashMap<String, TagId>) -> HashSet<TagId> {
        map.values().cloned().collect()
    }

    async fn active_actor() -> (TagRegistryActor, Arc<MemorySnapshotStore>) {
        let store = Arc::new(MemorySnapshotStore::new());
        let mut actor = TagRegistryActor::new("app", store.clone());
        assert_ok!(actor.activate().await);
        (actor, store)
    }

    #[tokio::test]
    async fn test_add_tags() {
        let (mut actor, _) = active_actor().await;

        assert_ok!(actor.normalize_tags(&set(&["tag1", "tag2"]), &HashSet::new()).await);
        assert_ok!(actor.normalize_tags(&set(&["tag2", "tag3"]), &HashSet::new()).await);

        let tags = assert_ok!(actor.get_tags());
        assert_eq!(
            tags,
            HashMap::from([
                ("tag1".to_string(), 1),
                ("tag2".to_string(), 2),
                ("tag3".to_string(), 1),
            ])
        );
    }

    #[tokio::test]
    async fn test_same_name_returns_same_id() {
        let (mut actor, _) = active_actor().await;

        let first = assert_ok!(actor.normalize_tags(&set(&["tag1"]), &HashSet::new()).await);
        let second = assert_ok!(actor.normalize_tags(&set(&["tag1"]), &HashSet::new()).await);

        assert_eq!(first, second);
        assert_eq!(assert_ok!(actor.get_tags())["tag1"], 2);
    }

    #[tokio::test]
    async fn test_not_add_tags_if_already_added() {
        let (mut actor, _) = active_actor().await;

        let first = assert_ok!(
            actor
                .normalize_tags(&set(&["tag1", "tag2"]), &HashSet::new())
                .await
        );
        assert_ok!(
            actor
                .normalize_tags(&set(&["tag1", "tag2", "tag3"]), &values(&first))
                .await
        );

        let tags = assert_ok!(actor.get_tags());
        assert_eq!(tags.len(), 3);
        assert!(tags.values().all(|count| *count == 1));
    }

    #[tokio::test]
    async fn test_remove_tags() {
        let (mut actor, _) = active_actor().await;

        let first = assert_ok!(
            actor
                .normalize_tags(&set(&["tag1", "tag2"]), &HashSet::new())
                .await
        );
        assert_ok!(actor.normalize_tags(&set(&["tag2", "tag3"]), &HashSet::new()).await);
        let removed = assert_ok!(actor.normalize_tags(&HashSet::new(), &values(&first)).await);

        assert!(removed.is_empty());
        assert_eq!(
            assert_ok!(actor.get_tags()),
            HashMap::from([("tag2".to_string(), 1), ("tag3".to_string(), 1)])
        );
        assert!(assert_ok!(actor.get_tag_ids(&set(&["tag1"]))).is_empty());
    }

    #[tokio::test]
    async fn test_resolve_tag_names() {
        let (mut actor, _) = active_actor().await;

        let ids = assert_ok!(actor.normalize_tags(&set(&["tag1", "tag2"]), &HashSet::new()).await);
        let resolved = assert_ok!(actor.get_tag_ids(&set(&["tag1", "tag2", "invalid1"])));
        assert_eq!(ids, resolved);

        let names = assert_ok!(actor.denormalize_tags(&values(&ids)));
        assert_eq!(names[&ids["tag2"]], "tag2");
    }

    #[tokio::test]
    async fn test_rebuild_tags() {
        let (mut actor, _) = active_actor().await;
        let tags: TagSet = [
            ("1", Tag::with_count("tag1", 1)),
            ("2", Tag::with_count("tag2", 2)),
            ("3", Tag::with_count("tag3", 6)),
        ]
        .into_iter()
        .collect();

        assert_ok!(actor.rebuild(tags.clone()).await);

        assert_eq!(
            assert_ok!(actor.get_tags()),
            HashMap::from([
                ("tag1".to_string(), 1),
                ("tag2".to_string(), 2),
                ("tag3".to_string(), 6),
            ])
        );
        assert_eq!(assert_ok!(actor.get_exportable_tags()), tags);
    }

    #[tokio::test]
    async fn test_rebuild_from_export_is_idempotent() {
        let (mut actor, _) = active_actor().await;
        assert_ok!(actor.normalize_tags(&set(&["a", "b"]), &HashSet::new()).await);
        assert_ok!(actor.normalize_tags(&set(&["b"]), &HashSet::new()).await);

        let before = assert_ok!(actor.get_exportable_tags());
        assert_ok!(actor.rebuild(before.clone()).await);

        assert_eq!(assert_ok!(actor.get_exportable_tags()), before);
        assert_eq!(assert_ok!(actor.get_tags())["b"], 2);
    }

    #[tokio::test]
    async fn test_clear_deletes_and_resets_state() {
        let (mut actor, store) = active_actor().await;

        assert_ok!(actor.normalize_tags(&set(&["tag1", "tag2"]), &HashSet::new()).await);
        assert_ok!(actor.normalize_tags(&set(&["tag2", "tag3"]), &HashSet::new()).await);
        assert_ok!(actor.clear().await);

        assert!(assert_ok!(actor.get_tags()).is_empty());
        assert_eq!(actor.version(), Some(0));
        assert_eq!(store.stats().deletes, 1);
        assert!(store.peek("app").await.is_none());
    }

    #[tokio::test]
    async fn test_each_mutation_persists_snapshot() {
        let (mut actor, store) = active_actor().await;

        assert_ok!(actor.normalize_tags(&set(&["tag1"]), &HashSet::new()).await);
        assert_ok!(actor.normalize_tags(&set(&["tag1"]), &HashSet::new()).await);
        assert_ok!(actor.normalize_tags(&HashSet::new(), &set(&["unknown"])).await);

        let snapshot = store.peek("app").await.unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(store.stats().persists, 2);

        let state: RegistryState = serde_json::from_value(snapshot.state).unwrap();
        assert_eq!(state.tags.counts()["tag1"], 2);
    }

    #[tokio::test]
    async fn test_activation_restores_snapshot() {
        let (mut actor, store) = active_actor().await;
        let ids = assert_ok!(actor.normalize_tags(&set(&["tag1"]), &HashSet::new()).await);

        let mut restored = TagRegistryActor::new("app", store.clone());
        assert_eq!(restored.state(), ActorState::Unloaded);
        assert_ok!(restored.activate().await);

        assert_eq!(restored.state(), ActorState::Active);
        assert_eq!(restored.version(), Some(1));
        assert_eq!(assert_ok!(restored.get_tag_ids(&set(&["tag1"]))), ids);
    }

    #[tokio::test]
    async fn test_queries_fail_before_activation() {
        let store = Arc::new(MemorySnapshotStore::new());
        let mut actor = TagRegistryActor::new("app", store);

        assert!(matches!(assert_err!(actor.get_tags()), TagMeshError::NotActivated(_)));
        let err = assert_err!(actor.normalize_tags(&set(&["a"]), &HashSet::new()).await);
        assert!(matches!(err, TagMeshError::NotActivated(_)));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_last_good_state() {
        let store = Arc::new(FlakyStore::default());
        let mut actor = TagRegistryActor::new("app", store.clone());
        assert_ok!(actor.activate().await);
        assert_ok!(actor.normalize_tags(&set(&["tag1"]), &HashSet::new()).await);

        store.fail_writes.store(true, Ordering::SeqCst);
        let err = assert_err!(actor.normalize_tags(&set(&["tag1", "tag2"]), &HashSet::new()).await);
        assert!(matches!(err, TagMeshError::Persistence { .. }));
        let err = assert_err!(actor.clear().await);
        assert!(matches!(err, TagMeshError::Persistence { .. }));

        assert_eq!(
            assert_ok!(actor.get_tags()),
            HashMap::from([("tag1".to_string(), 1)])
        );
        assert_eq!(actor.version(), Some(1));

        store.fail_writes.store(false, Ordering::SeqCst);
        assert_ok!(actor.normalize_tags(&set(&["tag1", "tag2"]), &HashSet::new()).await);
        assert_eq!(assert_ok!(actor.get_tags())["tag1"], 2);
    }

    #[tokio::test]
    async fn test_activation_failure_is_reported() {
        let store = Arc::new(FlakyStore::default());
        store.fail_loads.store(true, Ordering::SeqCst);

        let mut actor = TagRegistryActor::new("app", store.clone());
        let err = assert_err!(actor.activate().await);
        assert!(matches!(err, TagMeshError::Activation { .. }));
        assert_eq!(actor.state(), ActorState::Unloaded);

        store.fail_loads.store(false, Ordering::SeqCst);
        assert_ok!(actor.activate().await);
    }

    #[tokio::test]
    async fn test_undecodable_snapshot_fails_activation() {
        let store = Arc::new(MemorySnapshotStore::new());
        let garbage = Snapshot::new("app", 1, serde_json::json!({ "tags": [1, 2, 3] }));
        assert_ok!(store.persist(garbage, None).await);

        let mut actor = TagRegistryActor::new("app", store);
        let err = assert_err!(actor.activate().await);
        assert!(matches!(err, TagMeshError::Activation { .. }));
    }

    #[tokio::test]
    async fn test_stale_writer_gets_conflict() {
        let (mut first, store) = active_actor().await;
        let mut second = TagRegistryActor::new("app", store.clone());
        assert_ok!(second.activate().await);

        assert_ok!(first.normalize_tags(&set(&["tag1"]), &HashSet::new()).await);
        let err = assert_err!(second.normalize_tags(&set(&["tag2"]), &HashSet::new()).await);

        assert!(err.is_conflict());
        assert!(assert_ok!(second.get_tags()).is_empty());
    }
}
