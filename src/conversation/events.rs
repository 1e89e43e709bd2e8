//! 客户端事件：流式文本片段、素材、错误（序列化为 JSON 供 SSE / 终端展示）
//!
//! 每个回合恰好一个终止事件：`chunk` 且 `isComplete=true`，或 `error`。

use serde::Serialize;

use crate::spec::{MissingField, ProgressSnapshot, SessionState};

/// 传输失败 / 超时时发给客户端的兜底回复
pub const FALLBACK_MESSAGE: &str = "抱歉，我暂时无法回应，请稍后再试。";

/// 单回合事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// 可见文本片段；最后一个片段 isComplete=true 并携带合并后的元数据
    Chunk(ChunkEvent),
    /// 标记触发的素材生成结果
    Asset { description: String, url: String },
    /// 回合失败（终止事件）
    Error { reason: TurnFailure, message: String },
}

impl TurnEvent {
    pub fn text(chunk: impl Into<String>) -> Self {
        TurnEvent::Chunk(ChunkEvent {
            chunk: chunk.into(),
            is_complete: false,
            metadata: None,
        })
    }

    pub fn complete(metadata: EventMetadata) -> Self {
        TurnEvent::Chunk(ChunkEvent {
            chunk: String::new(),
            is_complete: true,
            metadata: Some(metadata),
        })
    }

    pub fn failure(reason: TurnFailure) -> Self {
        TurnEvent::Error {
            reason,
            message: FALLBACK_MESSAGE.to_string(),
        }
    }

    /// 是否为终止事件
    pub fn is_terminal(&self) -> bool {
        match self {
            TurnEvent::Chunk(c) => c.is_complete,
            TurnEvent::Asset { .. } => false,
            TurnEvent::Error { .. } => true,
        }
    }

    /// 序列化为 JSON 字符串（SSE data 行）
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkEvent {
    pub chunk: String,
    pub is_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<EventMetadata>,
}

/// 回合结束时的进度元数据（合并之后计算）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub stage: String,
    pub progress: u8,
    pub missing_fields: Vec<MissingField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_state: Option<SessionState>,
    /// 状态是否已写入存储；false 表示存储中的副本落后于本次结果
    pub persisted: bool,
}

impl EventMetadata {
    pub fn from_snapshot(snapshot: &ProgressSnapshot, state: &SessionState, persisted: bool) -> Self {
        Self {
            stage: snapshot.stage.clone(),
            progress: snapshot.percentage,
            missing_fields: snapshot.missing_fields.clone(),
            full_state: Some(state.clone()),
            persisted,
        }
    }
}

/// 回合失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnFailure {
    /// 生成协作方不可用或流中断
    Transport,
    Timeout,
    Cancelled,
    /// 读取会话状态 / 历史失败
    Internal,
}

impl TurnFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnFailure::Transport => "transport",
            TurnFailure::Timeout => "timeout",
            TurnFailure::Cancelled => "cancelled",
            TurnFailure::Internal => "internal",
        }
    }
}
