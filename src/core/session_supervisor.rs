//! 会话监管：每会话串行化、取消与阶段跟踪
//!
//! 每个会话持有一把 tokio Mutex，同一会话的回合依次排队；不同会话互不影响。
//! 每个回合从根 token 派生子 token，cancel(session) 只取消该会话当前回合，shutdown 取消全部。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;

use super::state::TurnPhase;

#[derive(Debug, Default)]
struct SessionSlot {
    turn_lock: Arc<Mutex<()>>,
    cancel: Option<CancellationToken>,
    phase: TurnPhase,
}

/// 会话级生命周期管理
#[derive(Debug)]
pub struct SessionSupervisor {
    root: CancellationToken,
    sessions: RwLock<HashMap<String, SessionSlot>>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// 等待该会话上一回合结束，返回本回合的独占 guard
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut sessions = self.sessions.write().await;
            sessions
                .entry(session_id.to_string())
                .or_default()
                .turn_lock
                .clone()
        };
        lock.lock_owned().await
    }

    /// 非阻塞获取；会话正忙时返回 None
    pub async fn try_acquire(&self, session_id: &str) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut sessions = self.sessions.write().await;
            sessions
                .entry(session_id.to_string())
                .or_default()
                .turn_lock
                .clone()
        };
        lock.try_lock_owned().ok()
    }

    /// 为新回合登记取消令牌
    pub async fn begin_turn(&self, session_id: &str, token: CancellationToken) {
        let mut sessions = self.sessions.write().await;
        let slot = sessions.entry(session_id.to_string()).or_default();
        slot.cancel = Some(token);
        slot.phase = TurnPhase::Idle;
    }

    pub async fn end_turn(&self, session_id: &str) {
        if let Some(slot) = self.sessions.write().await.get_mut(session_id) {
            slot.cancel = None;
            slot.phase = TurnPhase::Idle;
        }
    }

    pub async fn set_phase(&self, session_id: &str, phase: TurnPhase) {
        if let Some(slot) = self.sessions.write().await.get_mut(session_id) {
            slot.phase = phase;
        }
    }

    pub async fn phase(&self, session_id: &str) -> TurnPhase {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.phase)
            .unwrap_or_default()
    }

    /// 取消该会话正在进行的回合；没有进行中的回合时返回 false
    pub async fn cancel(&self, session_id: &str) -> bool {
        match self.sessions.read().await.get(session_id).and_then(|s| s.cancel.as_ref()) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// 新回合的取消令牌（根 token 的子 token）
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// 取消全部会话的进行中回合
    pub fn shutdown(&self) {
        self.root.cancel();
    }
}

impl Default for SessionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
