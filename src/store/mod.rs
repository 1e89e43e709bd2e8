//! 存储层：会话状态、对话历史与事件日志（内存 / SQLite）

pub mod memory;
pub mod sqlite;
pub mod traits;

use std::path::Path;
use std::sync::Arc;

pub use memory::{MemoryStateStore, SessionRecord};
pub use sqlite::SqliteStateStore;
pub use traits::{EventQuery, SessionEvent, Severity, StateStore, StoreError};

/// 创建状态存储
///
/// 提供 db_path 时使用 SQLite，打开失败则回退到内存存储
pub fn create_state_store(db_path: Option<&Path>, max_history: usize) -> Arc<dyn StateStore> {
    if let Some(path) = db_path {
        match SqliteStateStore::open(path) {
            Ok(store) => {
                tracing::info!("Using SQLite state store: {:?}", path);
                return Arc::new(store);
            }
            Err(e) => {
                tracing::warn!("Failed to open SQLite store, falling back to memory: {}", e);
            }
        }
    }

    tracing::info!("Using in-memory state store");
    Arc::new(MemoryStateStore::new(max_history))
}
