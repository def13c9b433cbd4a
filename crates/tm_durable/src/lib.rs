//! # tm_durable - TagMesh Durable Execution
//!
//! 持久化执行底座: 快照存储契约 (内存 / SQLite)、标签注册表 Actor、
//! 按租户键路由与激活的 Registry Manager。

pub mod mailbox;
pub mod manager;
pub mod registry;
pub mod snapshot;
pub mod sqlite_store;

pub use mailbox::{RegistryMessage, TagRegistryHandle};
pub use manager::{RegistryConfig, RegistryManager};
pub use registry::{ActorState, TagRegistryActor};
pub use snapshot::{MemorySnapshotStore, Snapshot, SnapshotStore, StoreStats};
pub use sqlite_store::{SqliteSnapshotStore, SqliteStoreConfig};
