//! Intake - 增量需求提取与进度追踪引擎
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **conversation**: 客户端事件、带内标记过滤、流式编排器
//! - **core**: 错误、回合阶段、会话监管、编排器构建
//! - **llm**: 协作方抽象与实现（OpenAI 兼容 / Mock）、prompt 与提取解析
//! - **memory**: 对话消息与短期历史
//! - **observability**: tracing 初始化
//! - **spec**: 字段注册表、合并、进度评估、完成门控
//! - **store**: 会话状态、历史与事件日志存储（内存 / SQLite）

pub mod config;
pub mod conversation;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod spec;
pub mod store;

pub use conversation::{Orchestrator, TurnEvent, TurnHandle};
pub use core::IntakeError;
