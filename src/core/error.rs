//! 顶层错误类型
//!
//! 各层错误（存储、注册表、配置、完成检查）统一汇入 IntakeError；协作方错误只在回合内部处理，
//! 对外以 Transport / Timeout / Cancelled 呈现。

use thiserror::Error;

use crate::llm::LlmError;
use crate::spec::{RegistryError, ValidationError};
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum IntakeError {
    /// 必填字段未满足（可恢复：继续对话后再 finalize）
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("A turn is already in progress for session {0}")]
    TurnInProgress(String),

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Turn timed out after {0}s")]
    Timeout(u64),

    #[error("Collaborator unavailable: {0}")]
    Transport(String),
}

impl From<LlmError> for IntakeError {
    fn from(e: LlmError) -> Self {
        IntakeError::Transport(e.to_string())
    }
}
