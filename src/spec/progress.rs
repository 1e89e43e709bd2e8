//! 进度评估：从会话状态纯函数式地推导完成度、阶段与缺失字段
//!
//! ProgressSnapshot 从不作为事实来源单独保存，任何时候都可由 SessionState 重新计算。

use serde::{Deserialize, Serialize};

use super::registry::{FieldRegistry, SpecField};
use super::state::SessionState;

/// 缺失字段（供客户端展示、system prompt 与完成检查使用）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingField {
    pub id: String,
    pub label: String,
    pub category: String,
    pub priority: i32,
    pub required: bool,
    pub min_confidence: f64,
}

impl From<&SpecField> for MissingField {
    fn from(field: &SpecField) -> Self {
        Self {
            id: field.id.clone(),
            label: field.label.clone(),
            category: field.category.clone(),
            priority: field.priority,
            required: field.required,
            min_confidence: field.min_confidence,
        }
    }
}

/// 进度快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub completed: usize,
    pub total_required: usize,
    pub percentage: u8,
    pub stage: String,
    pub missing_fields: Vec<MissingField>,
}

/// 字段是否已满足：存在条目且置信度达到该字段阈值
pub fn satisfied(state: &SessionState, field: &SpecField) -> bool {
    state
        .confidence(&field.id)
        .is_some_and(|c| c >= field.min_confidence)
}

/// 未满足的字段，按 (priority, label) 升序
pub fn unsatisfied<'a>(
    registry: &'a FieldRegistry,
    state: &SessionState,
    required_only: bool,
) -> Vec<&'a SpecField> {
    let mut missing: Vec<&SpecField> = registry
        .fields()
        .iter()
        .filter(|f| !required_only || f.required)
        .filter(|f| !satisfied(state, f))
        .collect();
    missing.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.label.cmp(&b.label)));
    missing
}

/// 进度评估器
#[derive(Debug, Clone, Copy)]
pub struct ProgressEvaluator<'a> {
    registry: &'a FieldRegistry,
}

impl<'a> ProgressEvaluator<'a> {
    pub fn new(registry: &'a FieldRegistry) -> Self {
        Self { registry }
    }

    pub fn evaluate(&self, state: &SessionState) -> ProgressSnapshot {
        let total_required = self.registry.required().count();
        let completed = self
            .registry
            .required()
            .filter(|f| satisfied(state, f))
            .count();
        let percentage = if total_required == 0 {
            100
        } else {
            (completed * 100 / total_required) as u8
        };

        ProgressSnapshot {
            completed,
            total_required,
            percentage,
            stage: self.stage_for(percentage).to_string(),
            missing_fields: unsatisfied(self.registry, state, false)
                .into_iter()
                .map(MissingField::from)
                .collect(),
        }
    }

    /// 阈值 <= percentage 的最后一个阶段；阶段表首项阈值为 0，总能命中
    pub fn stage_for(&self, percentage: u8) -> &'a str {
        self.registry
            .stages()
            .iter()
            .take_while(|s| s.threshold <= percentage)
            .last()
            .map(|s| s.label.as_str())
            .unwrap_or_default()
    }
}
