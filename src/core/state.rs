//! 回合阶段：Idle → StreamingText → Extracting → Merging → Broadcasting → Idle

use serde::Serialize;

/// 单个会话当前所处的回合阶段（供观察者轮询）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    #[default]
    Idle,
    StreamingText,
    Extracting,
    Merging,
    Broadcasting,
}

impl TurnPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnPhase::Idle => "idle",
            TurnPhase::StreamingText => "streaming_text",
            TurnPhase::Extracting => "extracting",
            TurnPhase::Merging => "merging",
            TurnPhase::Broadcasting => "broadcasting",
        }
    }
}
