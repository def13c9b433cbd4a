//! # tm_core - TagMesh Core Primitives
//!
//! 核心原语层，定义标签集合、注册表状态与全局错误处理机制。
//! 此 crate 不涉及异步与 I/O，是整个项目的基础依赖。

pub mod error;
pub mod tag;

pub use error::{Result, TagMeshError};
pub use tag::{Normalized, RegistryState, Tag, TagId, TagSet};
