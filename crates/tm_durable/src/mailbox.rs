//! Actor 邮箱与地址
//!
//! 每个激活的注册表运行在独立的 tokio 任务上，
//! 按到达顺序逐条处理消息。

use std::collections::{HashMap, HashSet};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use tm_core::{Result, TagId, TagMeshError, TagSet};

use crate::registry::TagRegistryActor;

type Reply<T> = oneshot::Sender<Result<T>>;

/// 注册表消息
#[derive(Debug)]
pub enum RegistryMessage {
    NormalizeTags {
        names: HashSet<String>,
        ids_to_remove: HashSet<TagId>,
        reply: Reply<HashMap<String, TagId>>,
    },
    GetTagIds {
        names: HashSet<String>,
        reply: Reply<HashMap<String, TagId>>,
    },
    DenormalizeTags {
        ids: HashSet<TagId>,
        reply: Reply<HashMap<TagId, String>>,
    },
    GetTags {
        reply: Reply<HashMap<String, u64>>,
    },
    GetExportableTags {
        reply: Reply<TagSet>,
    },
    Rebuild {
        tags: TagSet,
        reply: Reply<()>,
    },
    Clear {
        reply: Reply<()>,
    },
    /// 停止 Actor: 之前入队的消息照常处理, 之后的消息被拒绝
    Stop,
}

/// 注册表地址
///
/// 可克隆; 所有克隆共享同一个邮箱。
/// 收到 `Stop` 或全部克隆被丢弃后 Actor 任务退出,
/// 此后通过旧地址的调用返回 [`TagMeshError::Mailbox`]。
#[derive(Debug, Clone)]
pub struct TagRegistryHandle {
    key: String,
    sender: mpsc::Sender<RegistryMessage>,
}

impl TagRegistryHandle {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Actor 任务是否已退出
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub async fn normalize_tags(
        &self,
        names: HashSet<String>,
        ids_to_remove: HashSet<TagId>,
    ) -> Result<HashMap<String, TagId>> {
        self.call(|reply| RegistryMessage::NormalizeTags {
            names,
            ids_to_remove,
            reply,
        })
        .await
    }

    pub async fn get_tag_ids(&self, names: HashSet<String>) -> Result<HashMap<String, TagId>> {
        self.call(|reply| RegistryMessage::GetTagIds { names, reply })
            .await
    }

    pub async fn denormalize_tags(&self, ids: HashSet<TagId>) -> Result<HashMap<TagId, String>> {
        self.call(|reply| RegistryMessage::DenormalizeTags { ids, reply })
            .await
    }

    pub async fn get_tags(&self) -> Result<HashMap<String, u64>> {
        self.call(|reply| RegistryMessage::GetTags { reply }).await
    }

    pub async fn get_exportable_tags(&self) -> Result<TagSet> {
        self.call(|reply| RegistryMessage::GetExportableTags { reply })
            .await
    }

    pub async fn rebuild(&self, tags: TagSet) -> Result<()> {
        self.call(|reply| RegistryMessage::Rebuild { tags, reply })
            .await
    }

    pub async fn clear(&self) -> Result<()> {
        self.call(|reply| RegistryMessage::Clear { reply }).await
    }

    /// 请求 Actor 停止; 已停止时忽略
    pub(crate) async fn stop(&self) {
        let _ = self.sender.send(RegistryMessage::Stop).await;
    }

    async fn call<T>(&self, message: impl FnOnce(Reply<T>) -> RegistryMessage) -> Result<T> {
        let (reply, response) = oneshot::channel();

        self.sender
            .send(message(reply))
            .await
            .map_err(|_| TagMeshError::Mailbox(format!("registry '{}' is stopped", self.key)))?;

        response.await.map_err(|_| {
            TagMeshError::Mailbox(format!("registry '{}' dropped the reply", self.key))
        })?
    }
}

/// 启动已激活的 Actor, 返回其地址与任务句柄
pub(crate) fn spawn(
    actor: TagRegistryActor,
    capacity: usize,
) -> (TagRegistryHandle, JoinHandle<()>) {
    let (sender, mailbox) = mpsc::channel(capacity.max(1));
    let key = actor.key().to_string();

    let task = tokio::spawn(run(actor, mailbox));

    (TagRegistryHandle { key, sender }, task)
}

async fn run(mut actor: TagRegistryActor, mut mailbox: mpsc::Receiver<RegistryMessage>) {
    while let Some(message) = mailbox.recv().await {
        if !handle(&mut actor, message).await {
            break;
        }
    }
    // 丢弃邮箱: 排在 Stop 之后的消息的回复通道随之关闭
    drop(mailbox);
    tracing::info!("Tag registry '{}' stopped", actor.key());
}

// 调用方放弃等待时回复发送失败, 忽略即可: 操作本身已完成或已回滚。
// 返回 false 表示 Actor 应停止。
async fn handle(actor: &mut TagRegistryActor, message: RegistryMessage) -> bool {
    match message {
        RegistryMessage::NormalizeTags {
            names,
            ids_to_remove,
            reply,
        } => {
            let _ = reply.send(actor.normalize_tags(&names, &ids_to_remove).await);
        }
        RegistryMessage::GetTagIds { names, reply } => {
            let _ = reply.send(actor.get_tag_ids(&names));
        }
        RegistryMessage::DenormalizeTags { ids, reply } => {
            let _ = reply.send(actor.denormalize_tags(&ids));
        }
        RegistryMessage::GetTags { reply } => {
            let _ = reply.send(actor.get_tags());
        }
        RegistryMessage::GetExportableTags { reply } => {
            let _ = reply.send(actor.get_exportable_tags());
        }
        RegistryMessage::Rebuild { tags, reply } => {
            let _ = reply.send(actor.rebuild(tags).await);
        }
        RegistryMessage::Clear { reply } => {
            let _ = reply.send(actor.clear().await);
        }
        RegistryMessage::Stop => return false,
    }
    true
}
