//! Registry Manager - Actor 生命周期管理与按键路由
//!
//! 每个键对应一个常驻槽位, 槽位由互斥锁保护,
//! 其中至多存放一个活跃的 Actor。
//! 激活与休眠都在槽位锁内完成: 并发的首次访问只触发一次激活,
//! 休眠会等待旧 Actor 任务退出后才释放槽位, 因此同一个键不会同时存在两个实例。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use tm_core::{Result, TagId, TagSet};

use crate::mailbox::{self, TagRegistryHandle};
use crate::registry::TagRegistryActor;
use crate::snapshot::SnapshotStore;

/// 管理器配置
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// 每个 Actor 的邮箱容量
    pub mailbox_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
        }
    }
}

/// 槽位中的活跃 Actor
struct Activation {
    handle: TagRegistryHandle,
    task: JoinHandle<()>,
}

impl Activation {
    /// 停止 Actor 并等待任务退出
    async fn stop(self) {
        self.handle.stop().await;
        if let Err(e) = self.task.await {
            tracing::warn!("Tag registry '{}' task failed: {}", self.handle.key(), e);
        }
    }
}

type Slot = Arc<Mutex<Option<Activation>>>;

/// Registry Manager - 管理所有租户的标签注册表
pub struct RegistryManager {
    store: Arc<dyn SnapshotStore>,
    config: RegistryConfig,
    slots: RwLock<HashMap<String, Slot>>,
}

impl RegistryManager {
    /// 创建新的管理器
    pub fn new(store: Arc<dyn SnapshotStore>, config: RegistryConfig) -> Self {
        Self {
            store,
            config,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// 使用默认配置创建
    pub fn with_store(store: Arc<dyn SnapshotStore>) -> Self {
        Self::new(store, RegistryConfig::default())
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// 获取 (必要时激活) 指定键的注册表地址
    pub async fn registry(&self, key: &str) -> Result<TagRegistryHandle> {
        let slot = self.slot(key).await;
        let mut current = slot.lock().await;

        if let Some(active) = current.as_ref() {
            if !active.handle.is_closed() {
                return Ok(active.handle.clone());
            }
            tracing::warn!("Tag registry '{}' has stopped, re-activating", key);
        }

        let mut actor = TagRegistryActor::new(key, self.store.clone());
        actor.activate().await?;

        let (handle, task) = mailbox::spawn(actor, self.config.mailbox_capacity);
        *current = Some(Activation {
            handle: handle.clone(),
            task,
        });
        Ok(handle)
    }

    /// 休眠: 停止 Actor 并等待其退出, 下次访问时从存储重新激活
    ///
    /// 停止前已入队的消息照常处理; 之后通过旧地址的调用返回
    /// [`tm_core::TagMeshError::Mailbox`]。
    pub async fn deactivate(&self, key: &str) -> bool {
        let Some(slot) = self.slots.read().await.get(key).cloned() else {
            return false;
        };

        let mut current = slot.lock().await;
        let Some(active) = current.take() else {
            return false;
        };
        active.stop().await;

        tracing::info!("Tag registry '{}' deactivated", key);
        true
    }

    /// 获取所有活跃的键
    pub async fn active_keys(&self) -> Vec<String> {
        let slots: Vec<(String, Slot)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect();

        let mut keys = Vec::new();
        for (key, slot) in slots {
            if slot.lock().await.is_some() {
                keys.push(key);
            }
        }
        keys.sort();
        keys
    }

    /// 获取活跃 Actor 数量
    pub async fn count(&self) -> usize {
        self.active_keys().await.len()
    }

    pub async fn normalize_tags(
        &self,
        key: &str,
        names: HashSet<String>,
        ids_to_remove: HashSet<TagId>,
    ) -> Result<HashMap<String, TagId>> {
        let handle = self.registry(key).await?;
        let result = handle.normalize_tags(names, ids_to_remove).await;
        self.settle(key, result).await
    }

    pub async fn get_tag_ids(
        &self,
        key: &str,
        names: HashSet<String>,
    ) -> Result<HashMap<String, TagId>> {
        self.registry(key).await?.get_tag_ids(names).await
    }

    pub async fn denormalize_tags(
        &self,
        key: &str,
        ids: HashSet<TagId>,
    ) -> Result<HashMap<TagId, String>> {
        self.registry(key).await?.denormalize_tags(ids).await
    }

    pub async fn get_tags(&self, key: &str) -> Result<HashMap<String, u64>> {
        self.registry(key).await?.get_tags().await
    }

    pub async fn get_exportable_tags(&self, key: &str) -> Result<TagSet> {
        self.registry(key).await?.get_exportable_tags().await
    }

    pub async fn rebuild(&self, key: &str, tags: TagSet) -> Result<()> {
        let handle = self.registry(key).await?;
        let result = handle.rebuild(tags).await;
        self.settle(key, result).await
    }

    pub async fn clear(&self, key: &str) -> Result<()> {
        self.registry(key).await?.clear().await
    }

    /// 版本冲突说明存储已被其他写入者推进:
    /// 休眠该 Actor, 下次调用从存储重新加载。冲突本身仍返回给调用方, 不自动重试。
    async fn settle<T>(&self, key: &str, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_conflict() {
                tracing::warn!("Tag registry '{}' is stale, evicting: {}", key, e);
                self.deactivate(key).await;
            }
        }
        result
    }

    async fn slot(&self, key: &str) -> Slot {
        if let Some(slot) = self.slots.read().await.get(key) {
            return slot.clone();
        }

        let mut slots = self.slots.write().await;
        slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }
}
