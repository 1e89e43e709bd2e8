//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `INTAKE__*` 覆盖（双下划线表示嵌套，如 `INTAKE__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::spec::DEFAULT_CONFIDENCE;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub spec: SpecSection,
    pub turn: TurnSection,
}

/// [app] 段：应用名、SQLite 路径、字段定义文件
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
    /// 未设置时使用内存存储
    pub db_path: Option<PathBuf>,
    /// 字段定义 TOML，未设置时使用内置默认字段
    pub fields_path: Option<PathBuf>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：openai / mock；openai 需要 OPENAI_API_KEY
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// 提取模型，未设置时与对话模型相同
    pub extraction_model: Option<String>,
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            extraction_model: None,
            base_url: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "openai".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [spec] 段：合并参数
#[derive(Debug, Clone, Deserialize)]
pub struct SpecSection {
    /// 提取结果未给出置信度时使用的默认值（INTAKE__SPEC__DEFAULT_CONFIDENCE）
    #[serde(default = "default_confidence")]
    pub default_confidence: f64,
}

impl Default for SpecSection {
    fn default() -> Self {
        Self {
            default_confidence: default_confidence(),
        }
    }
}

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

/// [turn] 段：单轮超时、历史窗口、事件缓冲
#[derive(Debug, Clone, Deserialize)]
pub struct TurnSection {
    /// 生成 + 提取的总时限（秒）
    #[serde(default = "default_turn_timeout_secs")]
    pub timeout_secs: u64,
    /// 送入模型的历史消息条数
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for TurnSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_turn_timeout_secs(),
            history_limit: default_history_limit(),
            event_buffer: default_event_buffer(),
        }
    }
}

fn default_turn_timeout_secs() -> u64 {
    120
}

fn default_history_limit() -> usize {
    10
}

fn default_event_buffer() -> usize {
    64
}

/// 从 config 目录加载配置，环境变量 INTAKE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 INTAKE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("INTAKE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

/// 重新从磁盘与环境变量加载配置
pub fn reload_config() -> Result<AppConfig, config::ConfigError> {
    load_config(None)
}
