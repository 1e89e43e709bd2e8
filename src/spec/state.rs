//! 会话状态：字段 ID -> 已捕获条目
//!
//! 只由 SpecMerger 产出新快照，存储层以 `Arc<SessionState>` 整体替换（copy-on-write），
//! 并发读者永远看不到「更新了一半」的字段集合。没有删除操作。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::value::FieldEntry;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionState {
    entries: BTreeMap<String, FieldEntry>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field_id: &str) -> Option<&FieldEntry> {
        self.entries.get(field_id)
    }

    pub fn confidence(&self, field_id: &str) -> Option<f64> {
        self.entries.get(field_id).map(|e| e.confidence)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 仅供合并器使用：写入（覆盖）单个条目
    pub(crate) fn upsert(&mut self, field_id: &str, entry: FieldEntry) {
        self.entries.insert(field_id.to_string(), entry);
    }
}
