//! 标签集合定义

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 标签 ID 类型别名 (不透明字符串)
pub type TagId = String;

/// 单个标签: 名称 + 引用计数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// 标签名称
    pub name: String,
    /// 引用计数
    pub count: u64,
}

impl Tag {
    /// 创建计数为 1 的新标签
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_count(name, 1)
    }

    pub fn with_count(name: impl Into<String>, count: u64) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

/// 标签集合: tag id -> Tag
///
/// 名称索引由 `tags` 派生，不参与序列化。序列化格式为
/// `{ "<id>": { "name": "...", "count": n } }`。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<TagId, Tag>", into = "BTreeMap<TagId, Tag>")]
pub struct TagSet {
    tags: BTreeMap<TagId, Tag>,
    by_name: HashMap<String, TagId>,
}

/// 一次归一化调用的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Normalized {
    /// 新增名称 -> 标签 ID
    pub tag_ids: HashMap<String, TagId>,
    /// 集合是否发生变化
    pub changed: bool,
}

impl TagSet {
    /// 创建空集合
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或替换一个条目，同时维护名称索引
    ///
    /// 名称保持唯一: 若该名称已属于另一个 ID，旧条目被移除。
    pub(crate) fn insert(&mut self, id: impl Into<TagId>, tag: Tag) -> Option<Tag> {
        let id = id.into();
        if let Some(owner) = self.by_name.insert(tag.name.clone(), id.clone()) {
            if owner != id {
                self.tags.remove(&owner);
            }
        }

        let previous = self.tags.insert(id, tag);
        if let Some(old) = &previous {
            self.unindex(&old.name);
        }
        previous
    }

    pub fn get(&self, id: &str) -> Option<&Tag> {
        self.tags.get(id)
    }

    /// 按名称查找标签 ID
    pub fn id_of(&self, name: &str) -> Option<&TagId> {
        self.by_name.get(name)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.tags.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TagId, &Tag)> {
        self.tags.iter()
    }

    /// 归一化: 为 `names` 分配或复用 ID，并释放 `ids_to_remove` 中的引用
    ///
    /// 已存在的名称计数加一; 新名称分配新 ID，计数为 1。
    /// 待移除的 ID 计数减一，归零即删除; 不存在的 ID 忽略。若某名称解析到的已有 ID 同时出现在
    /// `ids_to_remove` 中，两者相互抵消，计数不变。空白名称被跳过。
    pub fn normalize(
        &mut self,
        names: &HashSet<String>,
        ids_to_remove: &HashSet<TagId>,
    ) -> Normalized {
        let mut result = Normalized::default();
        let mut kept = HashSet::new();

        for name in names {
            if name.trim().is_empty() {
                continue;
            }

            let id = match self.by_name.get(name) {
                Some(id) => {
                    let id = id.clone();
                    if ids_to_remove.contains(&id) {
                        kept.insert(id.clone());
                    } else if let Some(tag) = self.tags.get_mut(&id) {
                        tag.count += 1;
                        result.changed = true;
                    }
                    id
                }
                None => {
                    let id = self.fresh_id();
                    self.insert(id.clone(), Tag::new(name.clone()));
                    result.changed = true;
                    id
                }
            };

            result.tag_ids.insert(name.clone(), id);
        }

        for id in ids_to_remove {
            if !kept.contains(id) && self.release(id) {
                result.changed = true;
            }
        }

        result
    }

    /// 解析名称到 ID; 未知名称不出现在结果中
    pub fn get_tag_ids(&self, names: &HashSet<String>) -> HashMap<String, TagId> {
        names
            .iter()
            .filter_map(|name| self.by_name.get(name).map(|id| (name.clone(), id.clone())))
            .collect()
    }

    /// 解析 ID 到名称; 未知 ID 不出现在结果中
    pub fn denormalize(&self, ids: &HashSet<TagId>) -> HashMap<TagId, String> {
        ids.iter()
            .filter_map(|id| self.tags.get(id).map(|tag| (id.clone(), tag.name.clone())))
            .collect()
    }

    /// 名称 -> 计数
    pub fn counts(&self) -> HashMap<String, u64> {
        self.tags
            .values()
            .map(|tag| (tag.name.clone(), tag.count))
            .collect()
    }

    /// 引用计数减一，归零时删除; 返回 ID 是否存在
    fn release(&mut self, id: &str) -> bool {
        let Some(tag) = self.tags.get_mut(id) else {
            return false;
        };

        tag.count = tag.count.saturating_sub(1);
        if tag.count == 0 {
            if let Some(removed) = self.tags.remove(id) {
                self.unindex(&removed.name);
            }
        }
        true
    }

    fn unindex(&mut self, name: &str) {
        let stale = self
            .by_name
            .get(name)
            .is_some_and(|id| !self.tags.get(id).is_some_and(|tag| tag.name == name));
        if stale {
            self.by_name.remove(name);
        }
    }

    fn fresh_id(&self) -> TagId {
        loop {
            let id = Uuid::new_v4().to_string();
            if !self.tags.contains_key(&id) {
                return id;
            }
        }
    }
}

impl From<BTreeMap<TagId, Tag>> for TagSet {
    fn from(tags: BTreeMap<TagId, Tag>) -> Self {
        let by_name = tags
            .iter()
            .map(|(id, tag)| (tag.name.clone(), id.clone()))
            .collect();
        Self { tags, by_name }
    }
}

impl From<TagSet> for BTreeMap<TagId, Tag> {
    fn from(set: TagSet) -> Self {
        set.tags
    }
}

impl<I: Into<TagId>> FromIterator<(I, Tag)> for TagSet {
    fn from_iter<T: IntoIterator<Item = (I, Tag)>>(iter: T) -> Self {
        let tags: BTreeMap<TagId, Tag> = iter
            .into_iter()
            .map(|(id, tag)| (id.into(), tag))
            .collect();
        Self::from(tags)
    }
}

/// 注册表状态: 快照持久化的单元
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryState {
    #[serde(default)]
    pub tags: TagSet,
}

impl RegistryState {
    pub fn new(tags: TagSet) -> Self {
        Self { tags }
    }
}
