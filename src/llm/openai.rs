//! OpenAI 兼容 API 协作方
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）；
//! 回复走 create_stream 流式输出，提取走普通 create 并解析 JSON。

use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequestArgs,
};
use async_openai::Client;
use async_trait::async_trait;
use futures_util::StreamExt;

use super::extraction::parse_extraction;
use super::prompt::build_extraction_prompt;
use super::{Collaborator, ExtractionRequest, FragmentStream, LlmError, TurnRequest};
use crate::memory::{Message, Role};
use crate::spec::{ExtractionDelta, FieldRegistry};

/// OpenAI 兼容协作方：持有 Client、对话模型与提取模型名
pub struct OpenAiCollaborator {
    client: Client<OpenAIConfig>,
    model: String,
    extraction_model: String,
    registry: Arc<FieldRegistry>,
    request_timeout: Duration,
}

impl OpenAiCollaborator {
    pub fn new(
        base_url: Option<&str>,
        model: &str,
        api_key: Option<&str>,
        registry: Arc<FieldRegistry>,
    ) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let config = if let Some(url) = base_url {
            OpenAIConfig::new().with_api_base(url).with_api_key(api_key)
        } else {
            OpenAIConfig::new().with_api_key(api_key)
        };

        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            extraction_model: model.to_string(),
            registry,
            request_timeout: Duration::from_secs(60),
        }
    }

    /// 提取使用单独（通常更便宜）的模型
    pub fn with_extraction_model(mut self, model: impl Into<String>) -> Self {
        self.extraction_model = model.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn to_openai_messages(messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>, LlmError> {
        let invalid = |e: async_openai::error::OpenAIError| LlmError::Api(e.to_string());
        messages
            .iter()
            .map(|m| -> Result<ChatCompletionRequestMessage, LlmError> {
                Ok(match m.role {
                    Role::System => ChatCompletionRequestMessage::System(
                        ChatCompletionRequestSystemMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(invalid)?,
                    ),
                    Role::User => ChatCompletionRequestMessage::User(
                        ChatCompletionRequestUserMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(invalid)?,
                    ),
                    Role::Assistant => ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .content(m.content.clone())
                            .build()
                            .map_err(invalid)?,
                    ),
                })
            })
            .collect()
    }
}

#[async_trait]
impl Collaborator for OpenAiCollaborator {
    async fn stream_reply(&self, request: &TurnRequest) -> Result<FragmentStream, LlmError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::to_openai_messages(&request.to_messages())?)
            .build()
            .map_err(|e| LlmError::Api(e.to_string()))?;

        let stream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let fragments = stream.filter_map(|item| async move {
            match item {
                Ok(chunk) => chunk
                    .choices
                    .into_iter()
                    .filter_map(|c| c.delta.content)
                    .reduce(|mut a, b| {
                        a.push_str(&b);
                        a
                    })
                    .filter(|s| !s.is_empty())
                    .map(Ok),
                Err(e) => Some(Err(LlmError::Transport(e.to_string()))),
            }
        });
        Ok(Box::pin(fragments))
    }

    async fn extract(&self, request: &ExtractionRequest) -> Result<ExtractionDelta, LlmError> {
        let prompt = build_extraction_prompt(&self.registry, &request.transcript);
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.extraction_model)
            .messages(Self::to_openai_messages(&[Message::user(prompt)])?)
            .temperature(0.1)
            .build()
            .map_err(|e| LlmError::Api(e.to_string()))?;

        let response = tokio::time::timeout(self.request_timeout, self.client.chat().create(request))
            .await
            .map_err(|_| LlmError::Transport("extraction request timed out".to_string()))?
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default();

        tracing::debug!(chars = content.len(), "extraction response received");
        parse_extraction(&content)
    }

    async fn generate_asset(&self, description: &str) -> Result<Option<String>, LlmError> {
        // 兼容端点不保证提供图片生成；返回 None 由编排器跳过素材事件
        tracing::debug!(description, "asset generation not supported by this backend");
        Ok(None)
    }
}
