//! 完成门控：所有必填字段满足后才允许生成 Brief
//!
//! 校验失败返回精确的缺失必填字段列表（可恢复，调用方可继续对话）；
//! 成功时按各字段的 BriefSlot 投影到固定输出结构。对未变化的状态重复调用得到相同 Brief
//! （generated_at 除外）。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::progress::{unsatisfied, MissingField};
use super::registry::{BriefSlot, FieldRegistry};
use super::state::SessionState;
use super::value::FieldValue;

/// 必填字段未满足
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{} required field(s) missing: {}", .missing.len(), missing_ids(.missing))]
pub struct ValidationError {
    pub missing: Vec<MissingField>,
}

fn missing_ids(missing: &[MissingField]) -> String {
    missing
        .iter()
        .map(|m| m.id.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// 交给下游协作方的最终结构化需求摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brief {
    pub session_id: String,
    pub user_profile: BTreeMap<String, FieldValue>,
    pub style_preferences: Vec<String>,
    pub key_requirements: Vec<String>,
    /// 全部已满足字段的原始值
    pub fields: BTreeMap<String, FieldValue>,
    pub generated_at: DateTime<Utc>,
}

/// 完成门控
#[derive(Debug, Clone, Copy)]
pub struct CompletionGate<'a> {
    registry: &'a FieldRegistry,
}

impl<'a> CompletionGate<'a> {
    pub fn new(registry: &'a FieldRegistry) -> Self {
        Self { registry }
    }

    /// 未满足的必填字段（空表示可 finalize）
    pub fn missing_required(&self, state: &SessionState) -> Vec<MissingField> {
        unsatisfied(self.registry, state, true)
            .into_iter()
            .map(MissingField::from)
            .collect()
    }

    pub fn finalize(&self, session_id: &str, state: &SessionState) -> Result<Brief, ValidationError> {
        let missing = self.missing_required(state);
        if !missing.is_empty() {
            return Err(ValidationError { missing });
        }

        let mut brief = Brief {
            session_id: session_id.to_string(),
            user_profile: BTreeMap::new(),
            style_preferences: Vec::new(),
            key_requirements: Vec::new(),
            fields: BTreeMap::new(),
            generated_at: Utc::now(),
        };

        // 按注册表顺序投影，保证结果确定
        for field in self.registry.fields() {
            if !super::progress::satisfied(state, field) {
                continue;
            }
            let Some(entry) = state.get(&field.id) else {
                continue;
            };
            match field.brief_slot {
                BriefSlot::Profile => {
                    brief.user_profile.insert(field.id.clone(), entry.value.clone());
                }
                BriefSlot::Style => brief.style_preferences.extend(entry.value.to_strings()),
                BriefSlot::Requirements => brief.key_requirements.extend(entry.value.to_strings()),
                BriefSlot::Omit => {}
            }
            brief.fields.insert(field.id.clone(), entry.value.clone());
        }

        Ok(brief)
    }
}
