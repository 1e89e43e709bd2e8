//! 内存状态存储
//!
//! 每个会话一份记录；状态以 Arc 快照保存，写入时整体替换，读者拿到的总是完整快照。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::traits::{EventQuery, SessionEvent, StateStore, StoreError};
use crate::memory::{ConversationMemory, Message};
use crate::spec::{MissingField, SessionState};

/// 单个会话的存储记录
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub state: Arc<SessionState>,
    pub missing_fields: Vec<MissingField>,
    pub stage: Option<String>,
    pub progress: u8,
    pub history: ConversationMemory,
    pub events: Vec<SessionEvent>,
}

impl SessionRecord {
    fn new(max_history: usize) -> Self {
        Self {
            state: Arc::new(SessionState::new()),
            missing_fields: Vec::new(),
            stage: None,
            progress: 0,
            history: ConversationMemory::new(max_history),
            events: Vec::new(),
        }
    }
}

/// 内存存储（测试与单进程部署）
pub struct MemoryStateStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
    max_history: usize,
}

impl MemoryStateStore {
    pub fn new(max_history: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_history,
        }
    }

    /// 读取整条记录的副本（观察/测试用）
    pub async fn record(&self, session_id: &str) -> Option<SessionRecord> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn with_record<F, R>(&self, session_id: &str, f: F) -> R
    where
        F: FnOnce(&mut SessionRecord) -> R,
    {
        let mut sessions = self.sessions.write().await;
        let record = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionRecord::new(self.max_history));
        f(record)
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new(200)
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_current_state(&self, session_id: &str) -> Result<Arc<SessionState>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|r| Arc::clone(&r.state))
            .unwrap_or_default())
    }

    async fn put_state(&self, session_id: &str, state: Arc<SessionState>) -> Result<(), StoreError> {
        self.with_record(session_id, |r| r.state = state).await;
        Ok(())
    }

    async fn put_missing_fields(
        &self,
        session_id: &str,
        missing: &[MissingField],
    ) -> Result<(), StoreError> {
        self.with_record(session_id, |r| r.missing_fields = missing.to_vec())
            .await;
        Ok(())
    }

    async fn put_stage(&self, session_id: &str, stage: &str, progress: u8) -> Result<(), StoreError> {
        self.with_record(session_id, |r| {
            r.stage = Some(stage.to_string());
            r.progress = progress;
        })
        .await;
        Ok(())
    }

    async fn append_messages(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        self.with_record(session_id, |r| {
            for m in messages {
                r.history.push(m.clone());
            }
        })
        .await;
        Ok(())
    }

    async fn history(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|r| r.history.recent(limit).to_vec())
            .unwrap_or_default())
    }

    async fn log_event(&self, session_id: &str, event: SessionEvent) -> Result<(), StoreError> {
        self.with_record(session_id, |r| r.events.push(event)).await;
        Ok(())
    }

    async fn events(&self, session_id: &str, query: &EventQuery) -> Result<Vec<SessionEvent>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|r| {
                r.events
                    .iter()
                    .rev()
                    .filter(|e| query.matches(e))
                    .take(query.limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
