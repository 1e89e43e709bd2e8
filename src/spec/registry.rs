//! 字段注册表：声明所有可追踪的信息项与阶段阈值表
//!
//! 注册表在会话期间不可变。未知字段 ID 在其它任何地方出现时都被静默忽略，
//! 便于提取模型的输出格式向前兼容。可从 TOML 文件加载自定义注册表：
//!
//! ```toml
//! [[fields]]
//! id = "budget_range"
//! label = "预算范围"
//! category = "budget"
//! kind = "text"
//! required = true
//! min_confidence = 0.7
//! priority = 3
//! brief_slot = "profile"
//!
//! [[stages]]
//! label = "greeting"
//! threshold = 0
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::value::FieldKind;

/// 注册表构建错误
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Duplicate field id: {0}")]
    DuplicateField(String),

    #[error("Field {id}: min_confidence {value} is outside [0, 1]")]
    InvalidThreshold { id: String, value: f64 },

    #[error("Stage table must be non-empty and start at threshold 0")]
    InvalidStageTable,

    #[error("Registry file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Registry parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// 字段在 Brief 中的投影位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BriefSlot {
    /// 进入 user_profile（保留原值）
    #[default]
    Profile,
    /// 追加到 style_preferences
    Style,
    /// 追加到 key_requirements
    Requirements,
    /// 不进入任何汇总槽位（仍保留在 fields 中）
    Omit,
}

/// 单个可追踪字段的声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecField {
    pub id: String,
    pub label: String,
    pub category: String,
    pub kind: FieldKind,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    pub priority: i32,
    #[serde(default)]
    pub brief_slot: BriefSlot,
}

fn default_required() -> bool {
    true
}

fn default_min_confidence() -> f64 {
    0.7
}

impl SpecField {
    pub fn new(id: &str, label: &str, category: &str, kind: FieldKind, priority: i32) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            category: category.to_string(),
            kind,
            required: true,
            min_confidence: default_min_confidence(),
            priority,
            brief_slot: BriefSlot::Profile,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn min_confidence(mut self, value: f64) -> Self {
        self.min_confidence = value;
        self
    }

    pub fn slot(mut self, slot: BriefSlot) -> Self {
        self.brief_slot = slot;
        self
    }
}

/// 阶段：(label, threshold)，按阈值升序排列
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub label: String,
    pub threshold: u8,
}

impl Stage {
    pub fn new(label: &str, threshold: u8) -> Self {
        Self {
            label: label.to_string(),
            threshold,
        }
    }
}

#[derive(Deserialize)]
struct RegistryFile {
    fields: Vec<SpecField>,
    #[serde(default)]
    stages: Vec<Stage>,
}

/// 字段注册表：有序字段集合 + 阶段阈值表
#[derive(Debug, Clone)]
pub struct FieldRegistry {
    fields: Vec<SpecField>,
    stages: Vec<Stage>,
}

impl FieldRegistry {
    /// 校验并构建注册表；阶段表会按阈值排序
    pub fn new(fields: Vec<SpecField>, mut stages: Vec<Stage>) -> Result<Self, RegistryError> {
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.id.as_str()) {
                return Err(RegistryError::DuplicateField(field.id.clone()));
            }
            if !(0.0..=1.0).contains(&field.min_confidence) {
                return Err(RegistryError::InvalidThreshold {
                    id: field.id.clone(),
                    value: field.min_confidence,
                });
            }
        }
        stages.sort_by_key(|s| s.threshold);
        if stages.first().map(|s| s.threshold) != Some(0) {
            return Err(RegistryError::InvalidStageTable);
        }
        Ok(Self { fields, stages })
    }

    /// 从 TOML 文本解析；未提供 [[stages]] 时使用默认阶段表
    pub fn from_toml_str(s: &str) -> Result<Self, RegistryError> {
        let file: RegistryFile = toml::from_str(s)?;
        let stages = if file.stages.is_empty() {
            default_stages()
        } else {
            file.stages
        };
        Self::new(file.fields, stages)
    }

    /// 从 TOML 文件加载
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn fields(&self) -> &[SpecField] {
        &self.fields
    }

    pub fn lookup(&self, id: &str) -> Option<&SpecField> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn required(&self) -> impl Iterator<Item = &SpecField> {
        self.fields.iter().filter(|f| f.required)
    }
}

impl Default for FieldRegistry {
    /// 内置的装修需求采集字段
    fn default() -> Self {
        Self {
            fields: default_fields(),
            stages: default_stages(),
        }
    }
}

fn default_fields() -> Vec<SpecField> {
    vec![
        SpecField::new("project_type", "项目类型", "scope", FieldKind::Text, 1),
        SpecField::new("focus_areas", "重点改造区域", "scope", FieldKind::List, 2)
            .slot(BriefSlot::Requirements),
        SpecField::new("budget_range", "预算范围", "budget", FieldKind::Text, 3),
        SpecField::new("style_preference", "风格偏好", "design", FieldKind::Text, 4)
            .slot(BriefSlot::Style),
        SpecField::new("total_area", "空间面积", "scope", FieldKind::Number, 5),
        SpecField::new("timeline", "施工时程", "schedule", FieldKind::Text, 6).optional(),
        SpecField::new("material_preference", "材料偏好", "design", FieldKind::Text, 7)
            .optional()
            .slot(BriefSlot::Style),
        SpecField::new("quality_level", "品质等级", "budget", FieldKind::Text, 8).optional(),
        SpecField::new("special_requirements", "特殊需求", "scope", FieldKind::List, 9)
            .optional()
            .slot(BriefSlot::Requirements),
    ]
}

fn default_stages() -> Vec<Stage> {
    vec![
        Stage::new("greeting", 0),
        Stage::new("assessment", 20),
        Stage::new("clarification", 50),
        Stage::new("summary", 80),
        Stage::new("complete", 100),
    ]
}
