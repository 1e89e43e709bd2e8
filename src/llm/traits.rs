//! 文本生成 / 提取协作方抽象
//!
//! 所有后端（OpenAI 兼容 / Mock）实现 Collaborator：
//! stream_reply（流式文本片段）、extract（结构化提取增量）、generate_asset（辅助素材生成）。

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use thiserror::Error;

use crate::memory::Message;
use crate::spec::ExtractionDelta;

/// 协作方调用错误
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Invalid structured output: {0}")]
    InvalidOutput(String),
}

/// 文本片段流
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

/// 一轮对话的生成请求：system 上下文 + 有界历史 + 最新用户消息
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub user_message: String,
}

impl TurnRequest {
    /// 按 LLM API 顺序展开：system、历史、最新用户消息
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(Message::system(self.system_prompt.clone()));
        messages.extend(self.history.iter().cloned());
        messages.push(Message::user(self.user_message.clone()));
        messages
    }
}

/// 提取请求：完整对话记录（历史 + 本轮用户消息 + 本轮可见回复）
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub transcript: Vec<Message>,
}

/// 协作方 trait
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// 流式生成回复，返回文本片段流
    async fn stream_reply(&self, request: &TurnRequest) -> Result<FragmentStream, LlmError>;

    /// 对完整对话记录做结构化提取
    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionDelta, LlmError>;

    /// 根据描述生成辅助素材（如效果图），返回 URL；无结果时返回 None
    async fn generate_asset(&self, description: &str) -> Result<Option<String>, LlmError>;
}
