//! 流式编排器：驱动单个对话回合
//!
//! 回合阶段 Idle → StreamingText → Extracting → Merging → Broadcasting → Idle：
//! 1. 读取当前状态与有界历史，按缺失字段动态生成 system prompt
//! 2. 流式转发生成片段（剥离带内标记，标记作为独立任务派发素材生成）
//! 3. 对完整对话记录做一次提取，失败时降级为空增量
//! 4. 合并、计算进度、持久化，再发出 isComplete=true 的终止事件
//!
//! 生成 + 提取受回合时限与取消令牌约束；失败或取消的回合不写任何状态与历史。

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, OwnedMutexGuard};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::events::{EventMetadata, TurnEvent, TurnFailure};
use super::marker::{AssetRequest, Filtered, MarkerFilter};
use crate::config::TurnSection;
use crate::core::{IntakeError, SessionSupervisor, TurnPhase};
use crate::llm::{build_system_prompt, Collaborator, ExtractionRequest, TurnRequest, DEFAULT_PERSONA};
use crate::memory::Message;
use crate::spec::{
    Brief, CompletionGate, ExtractionDelta, FieldRegistry, MergeOutcome, ProgressEvaluator,
    ProgressSnapshot, SessionState, SpecMerger,
};
use crate::store::{EventQuery, SessionEvent, Severity, StateStore, StoreError};

const SOURCE: &str = "orchestrator";

/// 回合参数
#[derive(Debug, Clone)]
pub struct TurnSettings {
    /// 生成 + 提取的总时限
    pub timeout: Duration,
    pub history_limit: usize,
    pub event_buffer: usize,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self::from(&TurnSection::default())
    }
}

impl From<&TurnSection> for TurnSettings {
    fn from(section: &TurnSection) -> Self {
        Self {
            timeout: Duration::from_secs(section.timeout_secs),
            history_limit: section.history_limit,
            event_buffer: section.event_buffer,
        }
    }
}

/// submit 返回的回合句柄
pub struct TurnHandle {
    pub events: mpsc::Receiver<TurnEvent>,
    pub cancel: CancellationToken,
    pub join: JoinHandle<Result<ProgressSnapshot, IntakeError>>,
}

impl TurnHandle {
    pub async fn next(&mut self) -> Option<TurnEvent> {
        self.events.recv().await
    }

    /// 读完本回合全部事件并等待回合结束
    pub async fn collect(mut self) -> (Vec<TurnEvent>, Result<ProgressSnapshot, IntakeError>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        let result = match self.join.await {
            Ok(r) => r,
            Err(e) => Err(IntakeError::Transport(format!("turn task failed: {}", e))),
        };
        (events, result)
    }
}

/// 生成阶段产物
struct Generated {
    reply: String,
    delta: ExtractionDelta,
    effects: JoinSet<Option<TurnEvent>>,
}

struct Inner {
    registry: Arc<FieldRegistry>,
    merger: SpecMerger,
    store: Arc<dyn StateStore>,
    collaborator: Arc<dyn Collaborator>,
    supervisor: SessionSupervisor,
    persona: String,
    settings: TurnSettings,
}

/// 编排器（可 Clone，共享同一组组件）
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<FieldRegistry>,
        store: Arc<dyn StateStore>,
        collaborator: Arc<dyn Collaborator>,
    ) -> Self {
        Self::with_options(
            registry.clone(),
            store,
            collaborator,
            SpecMerger::new(registry),
            DEFAULT_PERSONA.to_string(),
            TurnSettings::default(),
        )
    }

    pub fn with_options(
        registry: Arc<FieldRegistry>,
        store: Arc<dyn StateStore>,
        collaborator: Arc<dyn Collaborator>,
        merger: SpecMerger,
        persona: String,
        settings: TurnSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                merger,
                store,
                collaborator,
                supervisor: SessionSupervisor::new(),
                persona,
                settings,
            }),
        }
    }

    pub fn registry(&self) -> &Arc<FieldRegistry> {
        &self.inner.registry
    }

    pub fn settings(&self) -> &TurnSettings {
        &self.inner.settings
    }

    /// 提交一条用户消息；同一会话的回合依次排队执行
    pub fn submit(&self, session_id: &str, message: impl Into<String>) -> TurnHandle {
        self.spawn_turn(session_id.to_string(), message.into(), None)
    }

    /// 同 submit，但会话已有进行中的回合时立即返回 TurnInProgress
    pub async fn try_submit(
        &self,
        session_id: &str,
        message: impl Into<String>,
    ) -> Result<TurnHandle, IntakeError> {
        let guard = self
            .inner
            .supervisor
            .try_acquire(session_id)
            .await
            .ok_or_else(|| IntakeError::TurnInProgress(session_id.to_string()))?;
        Ok(self.spawn_turn(session_id.to_string(), message.into(), Some(guard)))
    }

    fn spawn_turn(
        &self,
        session_id: String,
        message: String,
        guard: Option<OwnedMutexGuard<()>>,
    ) -> TurnHandle {
        let (tx, rx) = mpsc::channel(self.inner.settings.event_buffer.max(1));
        let token = self.inner.supervisor.child_token();
        let inner = self.inner.clone();
        let turn_token = token.clone();

        let join = tokio::spawn(async move {
            let _guard = match guard {
                Some(g) => g,
                None => inner.supervisor.acquire(&session_id).await,
            };
            inner.run_locked(&session_id, message, turn_token, tx).await
        });

        TurnHandle {
            events: rx,
            cancel: token,
            join,
        }
    }

    /// 取消该会话正在进行的回合
    pub async fn cancel(&self, session_id: &str) -> bool {
        self.inner.supervisor.cancel(session_id).await
    }

    /// 取消所有会话的进行中回合
    pub fn shutdown(&self) {
        self.inner.supervisor.shutdown();
    }

    pub async fn phase(&self, session_id: &str) -> TurnPhase {
        self.inner.supervisor.phase(session_id).await
    }

    /// 当前进度（供轮询客户端使用）
    pub async fn progress(&self, session_id: &str) -> Result<ProgressSnapshot, IntakeError> {
        let state = self.inner.store.get_current_state(session_id).await?;
        Ok(ProgressEvaluator::new(&self.inner.registry).evaluate(&state))
    }

    pub async fn state(&self, session_id: &str) -> Result<Arc<SessionState>, IntakeError> {
        Ok(self.inner.store.get_current_state(session_id).await?)
    }

    pub async fn history(&self, session_id: &str, limit: usize) -> Result<Vec<Message>, IntakeError> {
        Ok(self.inner.store.history(session_id, limit).await?)
    }

    /// 运维事件日志
    pub async fn events(
        &self,
        session_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<SessionEvent>, IntakeError> {
        Ok(self.inner.store.events(session_id, query).await?)
    }

    /// 完成检查：全部必填字段满足时生成 Brief，否则返回 Validation（含缺失字段）
    pub async fn finalize(&self, session_id: &str) -> Result<Brief, IntakeError> {
        let state = self.inner.store.get_current_state(session_id).await?;
        match CompletionGate::new(&self.inner.registry).finalize(session_id, &state) {
            Ok(brief) => {
                tracing::info!(session = session_id, fields = brief.fields.len(), "session finalized");
                self.inner
                    .log(
                        session_id,
                        SessionEvent::new("finalized", Severity::Info, SOURCE, "brief generated")
                            .with_payload(serde_json::json!({ "fields": brief.fields.len() })),
                    )
                    .await;
                Ok(brief)
            }
            Err(e) => {
                let missing: Vec<&str> = e.missing.iter().map(|m| m.id.as_str()).collect();
                tracing::info!(session = session_id, ?missing, "finalize rejected");
                self.inner
                    .log(
                        session_id,
                        SessionEvent::new("finalize_rejected", Severity::Warning, SOURCE, e.to_string())
                            .with_payload(serde_json::json!({ "missing": missing })),
                    )
                    .await;
                Err(e.into())
            }
        }
    }
}

impl Inner {
    async fn run_locked(
        &self,
        session_id: &str,
        message: String,
        token: CancellationToken,
        tx: mpsc::Sender<TurnEvent>,
    ) -> Result<ProgressSnapshot, IntakeError> {
        self.supervisor.begin_turn(session_id, token.clone()).await;
        let result = if token.is_cancelled() {
            Err(IntakeError::Cancelled)
        } else {
            self.run_turn(session_id, message, &token, &tx).await
        };
        if let Err(e) = &result {
            self.report_failure(session_id, e, &tx).await;
        }
        self.supervisor.end_turn(session_id).await;
        result
    }

    async fn run_turn(
        &self,
        session_id: &str,
        message: String,
        token: &CancellationToken,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<ProgressSnapshot, IntakeError> {
        let deadline = Instant::now() + self.settings.timeout;
        let prior = self.store.get_current_state(session_id).await?;
        let history = self.store.history(session_id, self.settings.history_limit).await?;
        let evaluator = ProgressEvaluator::new(&self.registry);
        let before = evaluator.evaluate(&prior);

        let request = TurnRequest {
            system_prompt: build_system_prompt(&self.persona, &self.registry, &prior, &before),
            history,
            user_message: message,
        };
        tracing::info!(session = session_id, progress = before.percentage, stage = %before.stage, "turn started");

        let generated = tokio::select! {
            biased;
            _ = token.cancelled() => Err(IntakeError::Cancelled),
            _ = tx.closed() => Err(IntakeError::Cancelled),
            r = tokio::time::timeout_at(deadline, self.generate_and_extract(session_id, &request, tx)) => {
                r.unwrap_or(Err(IntakeError::Timeout(self.settings.timeout.as_secs())))
            }
        };
        let Generated {
            reply,
            delta,
            mut effects,
        } = generated?;

        self.supervisor.set_phase(session_id, TurnPhase::Merging).await;
        let outcome = self.merger.merge(&prior, &delta);
        let snapshot = evaluator.evaluate(&outcome.state);
        let persisted = self
            .persist(session_id, &request.user_message, &reply, &outcome, &snapshot)
            .await;

        self.supervisor.set_phase(session_id, TurnPhase::Broadcasting).await;
        let drain = async {
            while let Some(joined) = effects.join_next().await {
                match joined {
                    Ok(Some(event)) => {
                        let _ = tx.send(event).await;
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(session = session_id, error = %e, "asset task failed"),
                }
            }
        };
        if tokio::time::timeout_at(deadline, drain).await.is_err() {
            tracing::warn!(session = session_id, "asset generation exceeded turn deadline");
            effects.abort_all();
        }

        let _ = tx
            .send(TurnEvent::complete(EventMetadata::from_snapshot(
                &snapshot,
                &outcome.state,
                persisted,
            )))
            .await;
        tracing::info!(
            session = session_id,
            progress = snapshot.percentage,
            stage = %snapshot.stage,
            applied = ?outcome.applied,
            persisted,
            "turn completed"
        );
        Ok(snapshot)
    }

    async fn generate_and_extract(
        &self,
        session_id: &str,
        request: &TurnRequest,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<Generated, IntakeError> {
        self.supervisor.set_phase(session_id, TurnPhase::StreamingText).await;
        let mut stream = self.collaborator.stream_reply(request).await?;
        let mut filter = MarkerFilter::new();
        let mut reply = String::new();
        let mut effects = JoinSet::new();

        while let Some(item) = stream.next().await {
            let fragment = item?;
            self.forward(filter.push(&fragment), &mut reply, &mut effects, tx)
                .await?;
        }
        self.forward(filter.finish(), &mut reply, &mut effects, tx).await?;

        self.supervisor.set_phase(session_id, TurnPhase::Extracting).await;
        let mut transcript = request.history.clone();
        transcript.push(Message::user(request.user_message.clone()));
        transcript.push(Message::assistant(reply.clone()));

        let delta = match self.collaborator.extract(&ExtractionRequest { transcript }).await {
            Ok(delta) => delta,
            Err(e) => {
                tracing::warn!(session = session_id, error = %e, "extraction failed, using empty delta");
                self.log(
                    session_id,
                    SessionEvent::new("extraction_failed", Severity::Warning, "extractor", e.to_string()),
                )
                .await;
                ExtractionDelta::new()
            }
        };

        Ok(Generated {
            reply,
            delta,
            effects,
        })
    }

    /// 转发过滤后的文本；接收端已关闭视为客户端断开
    async fn forward(
        &self,
        out: Filtered,
        reply: &mut String,
        effects: &mut JoinSet<Option<TurnEvent>>,
        tx: &mpsc::Sender<TurnEvent>,
    ) -> Result<(), IntakeError> {
        for asset in out.assets {
            self.dispatch_asset(asset, effects);
        }
        if !out.text.is_empty() {
            reply.push_str(&out.text);
            tx.send(TurnEvent::text(out.text))
                .await
                .map_err(|_| IntakeError::Cancelled)?;
        }
        Ok(())
    }

    fn dispatch_asset(&self, asset: AssetRequest, effects: &mut JoinSet<Option<TurnEvent>>) {
        let collaborator = self.collaborator.clone();
        effects.spawn(async move {
            match collaborator.generate_asset(&asset.description).await {
                Ok(Some(url)) => Some(TurnEvent::Asset {
                    description: asset.description,
                    url,
                }),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!(description = %asset.description, error = %e, "asset generation failed");
                    None
                }
            }
        });
    }

    /// 写入合并结果、镜像进度与本轮对话；失败只记录，不影响回复
    async fn persist(
        &self,
        session_id: &str,
        user_message: &str,
        reply: &str,
        outcome: &MergeOutcome,
        snapshot: &ProgressSnapshot,
    ) -> bool {
        let written: Result<(), StoreError> = async {
            if outcome.changed {
                self.store.put_state(session_id, outcome.state.clone()).await?;
            }
            self.store
                .put_missing_fields(session_id, &snapshot.missing_fields)
                .await?;
            self.store
                .put_stage(session_id, &snapshot.stage, snapshot.percentage)
                .await?;
            self.store
                .append_messages(
                    session_id,
                    &[Message::user(user_message), Message::assistant(reply)],
                )
                .await?;
            Ok(())
        }
        .await;

        match written {
            Ok(()) => {
                self.log(
                    session_id,
                    SessionEvent::new(
                        "turn_completed",
                        Severity::Info,
                        SOURCE,
                        format!("progress {}% ({})", snapshot.percentage, snapshot.stage),
                    )
                    .with_payload(serde_json::json!({
                        "applied": outcome.applied,
                        "progress": snapshot.percentage,
                        "stage": snapshot.stage,
                    })),
                )
                .await;
                true
            }
            Err(e) => {
                tracing::error!(session = session_id, error = %e, "failed to persist turn");
                self.log(
                    session_id,
                    SessionEvent::new("persist_failed", Severity::Error, SOURCE, e.to_string()),
                )
                .await;
                false
            }
        }
    }

    async fn report_failure(&self, session_id: &str, error: &IntakeError, tx: &mpsc::Sender<TurnEvent>) {
        let reason = match error {
            IntakeError::Cancelled => TurnFailure::Cancelled,
            IntakeError::Timeout(_) => TurnFailure::Timeout,
            IntakeError::Transport(_) => TurnFailure::Transport,
            _ => TurnFailure::Internal,
        };
        let (kind, severity) = match reason {
            TurnFailure::Cancelled => ("turn_cancelled", Severity::Info),
            _ => ("turn_failed", Severity::Error),
        };
        tracing::warn!(session = session_id, reason = reason.as_str(), error = %error, "turn aborted");

        let _ = tx.send(TurnEvent::failure(reason)).await;
        self.log(
            session_id,
            SessionEvent::new(kind, severity, SOURCE, error.to_string())
                .with_payload(serde_json::json!({ "reason": reason.as_str() })),
        )
        .await;
    }

    async fn log(&self, session_id: &str, event: SessionEvent) {
        if let Err(e) = self.store.log_event(session_id, event).await {
            tracing::warn!(session = session_id, error = %e, "failed to write session event");
        }
    }
}
