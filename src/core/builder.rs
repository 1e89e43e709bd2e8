//! 编排器构建：按配置组装字段注册表、存储、协作方
//!
//! 协作方选择：provider=openai 且设置了 OPENAI_API_KEY 时使用 OpenAI 兼容端点，否则回退到 Mock。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{load_config, AppConfig};
use crate::conversation::{Orchestrator, TurnSettings};
use crate::core::IntakeError;
use crate::llm::{load_persona, Collaborator, MockCollaborator, OpenAiCollaborator};
use crate::spec::{FieldRegistry, SpecMerger};
use crate::store::{create_state_store, StateStore};

/// 根据配置与环境变量选择协作方（OpenAI 兼容 / Mock）
pub fn create_collaborator_from_config(
    cfg: &AppConfig,
    registry: Arc<FieldRegistry>,
) -> Arc<dyn Collaborator> {
    let provider = cfg.llm.provider.to_lowercase();
    let api_key = std::env::var("OPENAI_API_KEY").ok();

    match (provider.as_str(), api_key) {
        ("openai", Some(key)) => {
            tracing::info!("Using OpenAI-compatible collaborator ({})", cfg.llm.model);
            let mut collaborator = OpenAiCollaborator::new(
                cfg.llm.base_url.as_deref(),
                &cfg.llm.model,
                Some(&key),
                registry,
            )
            .with_request_timeout(Duration::from_secs(cfg.llm.timeouts.request));
            if let Some(model) = &cfg.llm.extraction_model {
                collaborator = collaborator.with_extraction_model(model.clone());
            }
            Arc::new(collaborator)
        }
        _ => {
            tracing::warn!("No API key set or provider is mock, using Mock collaborator");
            Arc::new(MockCollaborator::new())
        }
    }
}

/// 构建器：配置之外允许注入存储与协作方（测试、嵌入场景）
pub struct OrchestratorBuilder {
    config: AppConfig,
    store: Option<Arc<dyn StateStore>>,
    collaborator: Option<Arc<dyn Collaborator>>,
    registry: Option<Arc<FieldRegistry>>,
    persona: Option<String>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            store: None,
            collaborator: None,
            registry: None,
            persona: None,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_collaborator(mut self, collaborator: Arc<dyn Collaborator>) -> Self {
        self.collaborator = Some(collaborator);
        self
    }

    pub fn with_registry(mut self, registry: Arc<FieldRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_persona(mut self, persona: impl Into<String>) -> Self {
        self.persona = Some(persona.into());
        self
    }

    pub fn build(self) -> Result<Orchestrator, IntakeError> {
        let cfg = self.config;
        let registry = match (self.registry, &cfg.app.fields_path) {
            (Some(r), _) => r,
            (None, Some(path)) => {
                tracing::info!("Loading field registry from {:?}", path);
                Arc::new(FieldRegistry::load(path)?)
            }
            (None, None) => Arc::new(FieldRegistry::default()),
        };
        let store = self.store.unwrap_or_else(|| {
            create_state_store(cfg.app.db_path.as_deref(), cfg.turn.history_limit.max(200))
        });
        let collaborator = self
            .collaborator
            .unwrap_or_else(|| create_collaborator_from_config(&cfg, registry.clone()));
        let merger =
            SpecMerger::new(registry.clone()).with_default_confidence(cfg.spec.default_confidence);
        let persona = self.persona.unwrap_or_else(load_persona);

        Ok(Orchestrator::with_options(
            registry,
            store,
            collaborator,
            merger,
            persona,
            TurnSettings::from(&cfg.turn),
        ))
    }
}

/// 从配置文件与环境变量创建编排器；配置加载失败时使用默认值
pub fn create_orchestrator(config_path: Option<PathBuf>) -> Result<Orchestrator, IntakeError> {
    let cfg = load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    OrchestratorBuilder::new(cfg).build()
}
