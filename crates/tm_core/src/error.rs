//! 全局错误处理机制

use thiserror::Error;

/// TagMesh 统一错误类型
#[derive(Error, Debug)]
pub enum TagMeshError {
    /// 激活失败: 快照无法加载或无法解码
    #[error("Activation of '{key}' failed: {reason}")]
    Activation { key: String, reason: String },

    /// 快照版本冲突: 另一个写入者已推进状态
    #[error("Persistence conflict on '{key}': expected version {expected}, found {actual}")]
    PersistenceConflict { key: String, expected: u64, actual: u64 },

    /// 快照写入失败
    #[error("Persistence of '{key}' failed: {reason}")]
    Persistence { key: String, reason: String },

    #[error("Registry '{0}' is not activated")]
    NotActivated(String),

    #[error("Mailbox error: {0}")]
    Mailbox(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TagMeshError {
    /// 是否为版本冲突
    pub fn is_conflict(&self) -> bool {
        matches!(self, TagMeshError::PersistenceConflict { .. })
    }
}

/// 统一 Result 类型别名
pub type Result<T> = std::result::Result<T, TagMeshError>;
