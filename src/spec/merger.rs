//! 规格合并器：按置信度门控将提取增量合并进会话状态
//!
//! 规则（逐字段）：
//! 1. 不在注册表中的字段 ID 忽略；值按声明类型规整，空值/类型不符跳过
//! 2. 置信度取增量中的分数（钳制到 [0,1]），缺失或非有限值时用可配置的默认值
//! 3. 新置信度 >= 现有置信度才覆盖，平局时新证据胜出；严格更低的证据被丢弃
//! 4. 值与置信度都与现有条目相同时不写入，保证合并幂等

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::registry::FieldRegistry;
use super::state::SessionState;
use super::value::{FieldEntry, FieldValue};

/// 未给出置信度时使用的默认值
pub const DEFAULT_CONFIDENCE: f64 = 0.6;

/// 单次提取产出的增量：字段值 + 各字段置信度
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionDelta {
    pub values: BTreeMap<String, FieldValue>,
    pub confidences: BTreeMap<String, f64>,
}

impl ExtractionDelta {
    pub fn new() -> Self {
        Self::default()
    }

    /// 链式添加：值 + 置信度
    pub fn with(mut self, field_id: &str, value: FieldValue, confidence: f64) -> Self {
        self.values.insert(field_id.to_string(), value);
        self.confidences.insert(field_id.to_string(), confidence);
        self
    }

    /// 链式添加：仅值（合并时使用默认置信度）
    pub fn with_value(mut self, field_id: &str, value: FieldValue) -> Self {
        self.values.insert(field_id.to_string(), value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// 合并结果：新快照、是否有字段真正变化、本次写入的字段 ID
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub state: Arc<SessionState>,
    pub changed: bool,
    pub applied: Vec<String>,
}

/// 规格合并器
#[derive(Debug, Clone)]
pub struct SpecMerger {
    registry: Arc<FieldRegistry>,
    default_confidence: f64,
}

impl SpecMerger {
    pub fn new(registry: Arc<FieldRegistry>) -> Self {
        Self {
            registry,
            default_confidence: DEFAULT_CONFIDENCE,
        }
    }

    /// 设置默认置信度（钳制到 [0,1]）
    pub fn with_default_confidence(mut self, confidence: f64) -> Self {
        self.default_confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            DEFAULT_CONFIDENCE
        };
        self
    }

    pub fn default_confidence(&self) -> f64 {
        self.default_confidence
    }

    pub fn registry(&self) -> &Arc<FieldRegistry> {
        &self.registry
    }

    /// 合并增量；输入快照不变，无变化时直接复用原 Arc
    pub fn merge(&self, state: &Arc<SessionState>, delta: &ExtractionDelta) -> MergeOutcome {
        let mut next: Option<SessionState> = None;
        let mut applied = Vec::new();

        for (field_id, raw) in &delta.values {
            let Some(field) = self.registry.lookup(field_id) else {
                tracing::debug!(field_id = %field_id, "ignoring unknown field in extraction delta");
                continue;
            };
            let Some(value) = raw.conform(field.kind) else {
                continue;
            };
            let confidence = delta
                .confidences
                .get(field_id)
                .copied()
                .filter(|c| c.is_finite())
                .map(|c| c.clamp(0.0, 1.0))
                .unwrap_or(self.default_confidence);

            let current = next.as_ref().unwrap_or(state.as_ref()).get(field_id);
            if let Some(existing) = current {
                if confidence < existing.confidence {
                    tracing::debug!(
                        field_id = %field_id,
                        incoming = confidence,
                        stored = existing.confidence,
                        "discarding weaker evidence"
                    );
                    continue;
                }
                if existing.value == value && existing.confidence == confidence {
                    continue;
                }
            }

            next.get_or_insert_with(|| state.as_ref().clone())
                .upsert(field_id, FieldEntry::new(value, confidence));
            applied.push(field_id.clone());
        }

        match next {
            Some(s) => MergeOutcome {
                state: Arc::new(s),
                changed: true,
                applied,
            },
            None => MergeOutcome {
                state: Arc::clone(state),
                changed: false,
                applied,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::registry::SpecField;
    use crate::spec::value::FieldKind;

    fn merger() -> SpecMerger {
        SpecMerger::new(Arc::new(FieldRegistry::default()))
    }

    #[test]
    fn test_weaker_evidence_never_overwrites() {
        let m = merger();
        let s0 = Arc::new(SessionState::new());
        let d1 = ExtractionDelta::new().with("project_type", FieldValue::text("x"), 0.9);
        let d2 = ExtractionDelta::new().with("project_type", FieldValue::text("y"), 0.5);
        let s1 = m.merge(&s0, &d1).state;
        let out = m.merge(&s1, &d2);
        assert!(!out.changed);
        assert_eq!(
            out.state.get("project_type").unwrap().value,
            FieldValue::text("x")
        );
    }

    #[test]
    fn test_tie_favors_newer_evidence() {
        let m = merger();
        let s0 = Arc::new(SessionState::new());
        let s1 = m
            .merge(&s0, &ExtractionDelta::new().with("project_type", FieldValue::text("局部改造"), 0.8))
            .state;
        let out = m.merge(
            &s1,
            &ExtractionDelta::new().with("project_type", FieldValue::text("全屋翻新"), 0.8),
        );
        assert!(out.changed);
        assert_eq!(
            out.state.get("project_type").unwrap().value,
            FieldValue::text("全屋翻新")
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let m = merger();
        let s0 = Arc::new(SessionState::new());
        let delta = ExtractionDelta::new()
            .with("budget_range", FieldValue::text("50-80万"), 0.9)
            .with("focus_areas", FieldValue::list(["厨房", "浴室"]), 0.85);
        let once = m.merge(&s0, &delta);
        let twice = m.merge(&once.state, &delta);
        assert!(once.changed);
        assert!(!twice.changed);
        assert_eq!(once.state, twice.state);
    }

    #[test]
    fn test_default_confidence_applies() {
        let m = merger().with_default_confidence(0.75);
        let s0 = Arc::new(SessionState::new());
        let out = m.merge(
            &s0,
            &ExtractionDelta::new().with_value("timeline", FieldValue::text("三个月")),
        );
        assert_eq!(out.state.confidence("timeline"), Some(0.75));
    }

    #[test]
    fn test_non_finite_confidence_falls_back_to_default() {
        let m = merger();
        let s0 = Arc::new(SessionState::new());
        let out = m.merge(
            &s0,
            &ExtractionDelta::new().with("timeline", FieldValue::text("年底前"), f64::NAN),
        );
        assert_eq!(out.state.confidence("timeline"), Some(DEFAULT_CONFIDENCE));
    }

    #[test]
    fn test_confidence_is_clamped() {
        let m = merger();
        let s0 = Arc::new(SessionState::new());
        let out = m.merge(
            &s0,
            &ExtractionDelta::new().with("timeline", FieldValue::text("年底前"), 3.0),
        );
        assert_eq!(out.state.confidence("timeline"), Some(1.0));
    }

    #[test]
    fn test_unknown_and_empty_values_ignored() {
        let m = merger();
        let s0 = Arc::new(SessionState::new());
        let delta = ExtractionDelta::new()
            .with("pet_count", FieldValue::Number(2.0), 0.9)
            .with("budget_range", FieldValue::text("   "), 0.9)
            .with("total_area", FieldValue::text("很大"), 0.9);
        let out = m.merge(&s0, &delta);
        assert!(!out.changed);
        assert!(out.state.is_empty());
        assert!(Arc::ptr_eq(&out.state, &s0));
    }

    #[test]
    fn test_input_snapshot_untouched() {
        let m = merger();
        let s0 = Arc::new(SessionState::new());
        let out = m.merge(
            &s0,
            &ExtractionDelta::new().with("total_area", FieldValue::Number(30.0), 0.9),
        );
        assert!(s0.is_empty());
        assert_eq!(out.applied, vec!["total_area".to_string()]);
        assert_eq!(
            out.state.get("total_area").unwrap().value,
            FieldValue::Number(30.0)
        );
    }

    #[test]
    fn test_custom_registry_kind_validation() {
        let registry = FieldRegistry::new(
            vec![SpecField::new("rooms", "房间数", "scope", FieldKind::Number, 1)],
            vec![crate::spec::registry::Stage::new("start", 0)],
        )
        .unwrap();
        let m = SpecMerger::new(Arc::new(registry));
        let s0 = Arc::new(SessionState::new());
        let out = m.merge(
            &s0,
            &ExtractionDelta::new().with("rooms", FieldValue::text("3"), 0.9),
        );
        assert_eq!(out.state.get("rooms").unwrap().value, FieldValue::Number(3.0));
    }
}
