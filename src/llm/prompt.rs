//! Prompt 构造：根据当前已采集/待采集字段动态生成 system prompt，以及提取 prompt
//!
//! 措辞不属于状态机契约，可通过 config/prompts/system.txt 覆盖基础人设部分。

use crate::memory::{render_transcript, Message};
use crate::spec::{FieldRegistry, ProgressSnapshot, SessionState};

use super::extraction::extraction_schema_json;

/// 默认基础人设
pub const DEFAULT_PERSONA: &str = "你是一位资深的室内设计项目经理，负责通过自然对话了解客户的装修需求。\n\
自然交流，不要列清单；优先追问尚未了解的信息；在获得关键信息后确认理解是否正确。\n\
需要向客户展示效果示意图时，在回复中单独输出一行 [GENERATE_IMAGE: 图片描述]，系统会替你生成图片。";

/// 从 config/prompts/system.txt 读取人设，不存在时使用默认值
pub fn load_persona() -> String {
    ["config/prompts/system.txt", "../config/prompts/system.txt"]
        .into_iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .unwrap_or_else(|| DEFAULT_PERSONA.to_string())
}

/// 动态 system prompt：人设 + 已采集信息 + 待采集信息
pub fn build_system_prompt(
    persona: &str,
    registry: &FieldRegistry,
    state: &SessionState,
    snapshot: &ProgressSnapshot,
) -> String {
    let collected: Vec<String> = registry
        .fields()
        .iter()
        .filter(|f| !snapshot.missing_fields.iter().any(|m| m.id == f.id))
        .filter_map(|f| {
            state
                .get(&f.id)
                .map(|e| format!("✓ {}：{}", f.label, e.value.display()))
        })
        .collect();
    let missing: Vec<String> = snapshot
        .missing_fields
        .iter()
        .map(|m| {
            if m.required {
                format!("• {}", m.label)
            } else {
                format!("• {}（可选）", m.label)
            }
        })
        .collect();

    format!(
        "{}\n\n【已采集的信息】\n{}\n\n【待采集的信息】\n{}\n\n【当前进度】{}%（{}）",
        persona,
        if collected.is_empty() {
            "还未开始采集".to_string()
        } else {
            collected.join("\n")
        },
        if missing.is_empty() {
            "无".to_string()
        } else {
            missing.join("\n")
        },
        snapshot.percentage,
        snapshot.stage,
    )
}

/// 提取 prompt：字段说明 + JSON Schema + 对话记录
pub fn build_extraction_prompt(registry: &FieldRegistry, transcript: &[Message]) -> String {
    let fields: Vec<String> = registry
        .fields()
        .iter()
        .map(|f| format!("- {} ({}，类型 {:?})", f.id, f.label, f.kind))
        .collect();

    format!(
        "分析以下对话，提取结构化的需求信息。\n\n【对话记录】\n{}\n\n【字段】\n{}\n\n\
         【输出格式】只返回一个 JSON 对象，未提及的字段为 null，符合以下 Schema：\n{}\n\n\
         confidence_scores 表示每个字段在对话中被提及的明确程度：完全明确 0.9-1.0，有暗示但不完全明确 0.5-0.8。",
        render_transcript(transcript),
        fields.join("\n"),
        extraction_schema_json(),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::spec::{ExtractionDelta, FieldValue, ProgressEvaluator, SpecMerger};

    #[test]
    fn test_system_prompt_lists_collected_and_missing() {
        let registry = Arc::new(FieldRegistry::default());
        let state = SpecMerger::new(registry.clone())
            .merge(
                &Arc::new(SessionState::new()),
                &ExtractionDelta::new().with("budget_range", FieldValue::text("80万"), 0.9),
            )
            .state;
        let snapshot = ProgressEvaluator::new(&registry).evaluate(&state);
        let prompt = build_system_prompt("persona", &registry, &state, &snapshot);
        assert!(prompt.starts_with("persona"));
        assert!(prompt.contains("✓ 预算范围：80万"));
        assert!(prompt.contains("• 项目类型"));
        assert!(prompt.contains("• 施工时程（可选）"));
        assert!(!prompt.contains("• 预算范围"));
    }

    #[test]
    fn test_extraction_prompt_contains_transcript() {
        let registry = FieldRegistry::default();
        let prompt = build_extraction_prompt(&registry, &[Message::user("想翻新厨房")]);
        assert!(prompt.contains("USER: 想翻新厨房"));
        assert!(prompt.contains("focus_areas"));
    }
}
