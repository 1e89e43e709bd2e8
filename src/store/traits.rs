//! 状态存储抽象层
//!
//! 编排器把存储视为内存状态的持久化镜像：所有状态写入都是合并器的直接产出，不做手工修改。
//! 同时保存有界对话历史与面向运维的会话事件日志。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::Message;
use crate::spec::{MissingField, SessionState};

/// 存储层错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Storage task failed: {0}")]
    Task(String),
}

/// 事件严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Severity::Info),
            "warning" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            _ => None,
        }
    }
}

/// 会话事件（仅追加的运维日志，不属于 SessionState）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub kind: String,
    pub severity: Severity,
    pub source: String,
    pub description: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(kind: &str, severity: Severity, source: &str, description: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            severity,
            source: source.to_string(),
            description: description.into(),
            payload: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// 事件查询条件：最新在前
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub limit: usize,
    pub severity: Option<Severity>,
    pub since: Option<DateTime<Utc>>,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            limit: 50,
            severity: None,
            since: None,
        }
    }
}

impl EventQuery {
    pub fn matches(&self, event: &SessionEvent) -> bool {
        self.severity.map_or(true, |s| event.severity == s)
            && self.since.map_or(true, |t| event.timestamp >= t)
    }
}

/// 会话状态存储接口
#[async_trait]
pub trait StateStore: Send + Sync {
    /// 读取当前状态快照；会话不存在时返回空状态
    async fn get_current_state(&self, session_id: &str) -> Result<Arc<SessionState>, StoreError>;

    /// 整体替换状态快照
    async fn put_state(&self, session_id: &str, state: Arc<SessionState>) -> Result<(), StoreError>;

    /// 镜像缺失字段列表（供观察者使用，非事实来源）
    async fn put_missing_fields(
        &self,
        session_id: &str,
        missing: &[MissingField],
    ) -> Result<(), StoreError>;

    /// 镜像阶段与进度
    async fn put_stage(&self, session_id: &str, stage: &str, progress: u8) -> Result<(), StoreError>;

    /// 追加对话消息
    async fn append_messages(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError>;

    /// 最近 limit 条对话消息（时间升序）
    async fn history(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, StoreError>;

    /// 写入事件日志
    async fn log_event(&self, session_id: &str, event: SessionEvent) -> Result<(), StoreError>;

    /// 查询事件日志
    async fn events(&self, session_id: &str, query: &EventQuery) -> Result<Vec<SessionEvent>, StoreError>;
}
