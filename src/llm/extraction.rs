//! 结构化提取输出解析与 Schema
//!
//! 提取模型返回 JSON：字段 ID -> 值，外加 `confidence_scores` 对象。
//! 解析时去掉 Markdown 代码块包裹，null / 非法类型跳过；整体不是 JSON 对象时返回 InvalidOutput，
//! 由编排器降级为空增量。

use std::collections::BTreeMap;

use schemars::{schema_for, JsonSchema};

use super::LlmError;
use crate::spec::{ExtractionDelta, FieldValue};

const CONFIDENCE_KEY: &str = "confidence_scores";

/// 提取结果格式（仅用于 Schema 生成，拼入提取 prompt）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ExtractionFormat {
    /// 字段 ID -> 值（文本、数值或字符串列表；未提及则为 null）
    #[serde(flatten)]
    pub values: BTreeMap<String, Option<serde_json::Value>>,
    /// 字段 ID -> 置信度（0-1）
    pub confidence_scores: BTreeMap<String, f64>,
}

/// 返回提取结果的 JSON Schema 字符串
pub fn extraction_schema_json() -> String {
    let schema = schema_for!(ExtractionFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

/// 去掉 ```json ... ``` 包裹
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// 将提取模型的原始输出解析为类型化增量
pub fn parse_extraction(raw: &str) -> Result<ExtractionDelta, LlmError> {
    let body = strip_code_fence(raw);
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| LlmError::InvalidOutput(e.to_string()))?;
    let serde_json::Value::Object(map) = value else {
        return Err(LlmError::InvalidOutput("expected a JSON object".to_string()));
    };

    let mut delta = ExtractionDelta::new();
    for (key, value) in &map {
        if key == CONFIDENCE_KEY {
            if let serde_json::Value::Object(scores) = value {
                for (field_id, score) in scores {
                    if let Some(c) = score.as_f64() {
                        delta.confidences.insert(field_id.clone(), c);
                    }
                }
            }
            continue;
        }
        if let Some(v) = FieldValue::from_json(value) {
            delta.values.insert(key.clone(), v);
        }
    }
    Ok(delta)
}
