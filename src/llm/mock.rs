//! Mock 协作方（用于测试与本地运行，无需 API）
//!
//! 按脚本逐轮返回文本片段、提取增量与故障；脚本耗尽后回显用户最后一条消息、提取结果为空。

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use super::{Collaborator, ExtractionRequest, FragmentStream, LlmError, TurnRequest};
use crate::spec::ExtractionDelta;

/// 回显时每段字符数（模拟打字效果）
const CHUNK_CHARS: usize = 6;

/// 单轮脚本
#[derive(Debug, Clone, Default)]
pub struct ScriptedTurn {
    pub fragments: Vec<String>,
    pub delta: Option<ExtractionDelta>,
    /// stream_reply 直接失败
    pub fail_on_start: bool,
    /// 输出 n 个片段后流中断
    pub fail_after: Option<usize>,
    /// extract 返回错误
    pub extraction_error: bool,
    /// 每个片段前的延迟
    pub fragment_delay: Option<Duration>,
    /// extract 前的延迟
    pub extraction_delay: Option<Duration>,
}

impl ScriptedTurn {
    pub fn reply<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fragments: fragments.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn fail_on_start() -> Self {
        Self {
            fail_on_start: true,
            ..Default::default()
        }
    }

    pub fn with_delta(mut self, delta: ExtractionDelta) -> Self {
        self.delta = Some(delta);
        self
    }

    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    pub fn with_extraction_error(mut self) -> Self {
        self.extraction_error = true;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.fragment_delay = Some(delay);
        self
    }

    pub fn with_extraction_delay(mut self, delay: Duration) -> Self {
        self.extraction_delay = Some(delay);
        self
    }
}

/// 本轮提取阶段要用到的脚本部分
#[derive(Debug, Default)]
struct PendingExtraction {
    delta: Option<ExtractionDelta>,
    error: bool,
    delay: Option<Duration>,
}

/// Mock 协作方
#[derive(Debug, Default)]
pub struct MockCollaborator {
    script: Mutex<VecDeque<ScriptedTurn>>,
    pending: Mutex<Option<PendingExtraction>>,
    requests: Mutex<Vec<TurnRequest>>,
    assets: Mutex<Vec<String>>,
    asset_failure: bool,
}

impl MockCollaborator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script<I>(turns: I) -> Self
    where
        I: IntoIterator<Item = ScriptedTurn>,
    {
        Self {
            script: Mutex::new(turns.into_iter().collect()),
            ..Default::default()
        }
    }

    /// generate_asset 一律失败
    pub fn with_asset_failure(mut self) -> Self {
        self.asset_failure = true;
        self
    }

    pub fn push(&self, turn: ScriptedTurn) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(turn);
        }
    }

    /// 已收到的生成请求（按顺序）
    pub fn requests(&self) -> Vec<TurnRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// 已请求生成的素材描述
    pub fn asset_requests(&self) -> Vec<String> {
        self.assets.lock().map(|a| a.clone()).unwrap_or_default()
    }

    fn next_turn(&self, request: &TurnRequest) -> ScriptedTurn {
        self.script
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .unwrap_or_else(|| {
                let echo = format!("收到：{}", request.user_message);
                let chars: Vec<char> = echo.chars().collect();
                ScriptedTurn::reply(chars.chunks(CHUNK_CHARS).map(|c| c.iter().collect::<String>()))
            })
    }
}

/// 占位图 URL
pub fn placeholder_asset_url(description: &str) -> String {
    format!(
        "https://placehold.co/800x600.png?text={}",
        description.trim().replace(' ', "+")
    )
}

#[async_trait]
impl Collaborator for MockCollaborator {
    async fn stream_reply(&self, request: &TurnRequest) -> Result<FragmentStream, LlmError> {
        if let Ok(mut r) = self.requests.lock() {
            r.push(request.clone());
        }
        let turn = self.next_turn(request);
        if let Ok(mut pending) = self.pending.lock() {
            *pending = Some(PendingExtraction {
                delta: turn.delta.clone(),
                error: turn.extraction_error,
                delay: turn.extraction_delay,
            });
        }
        if turn.fail_on_start {
            return Err(LlmError::Transport("mock: connection refused".to_string()));
        }

        let mut items: Vec<Result<String, LlmError>> = turn.fragments.into_iter().map(Ok).collect();
        if let Some(n) = turn.fail_after {
            items.truncate(n);
            items.push(Err(LlmError::Transport("mock: stream interrupted".to_string())));
        }
        let delay = turn.fragment_delay;
        Ok(Box::pin(stream::iter(items).then(move |item| async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            item
        })))
    }

    async fn extract(&self, _request: &ExtractionRequest) -> Result<ExtractionDelta, LlmError> {
        let pending = self
            .pending
            .lock()
            .ok()
            .and_then(|mut p| p.take())
            .unwrap_or_default();
        if let Some(d) = pending.delay {
            tokio::time::sleep(d).await;
        }
        if pending.error {
            return Err(LlmError::InvalidOutput("mock: malformed extraction".to_string()));
        }
        Ok(pending.delta.unwrap_or_default())
    }

    async fn generate_asset(&self, description: &str) -> Result<Option<String>, LlmError> {
        if let Ok(mut a) = self.assets.lock() {
            a.push(description.to_string());
        }
        if self.asset_failure {
            return Err(LlmError::Api("mock: asset generation disabled".to_string()));
        }
        Ok(Some(placeholder_asset_url(description)))
    }
}
