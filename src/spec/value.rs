//! 字段值：类型化的取值与单字段条目
//!
//! 提取结果在合并前按注册表声明的 FieldKind 做规整（conform），
//! 格式不符或为空的值视为「无证据」，不会写入状态。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 字段声明的取值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    List,
}

/// 类型化字段值：文本 / 数值 / 有序字符串列表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    pub fn list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    /// 从任意 JSON 值转换；null / bool / object 不构成证据，返回 None
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number),
            serde_json::Value::Array(items) => Some(Self::List(
                items
                    .iter()
                    .filter_map(|item| match item {
                        serde_json::Value::String(s) => Some(s.clone()),
                        serde_json::Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .collect(),
            )),
            _ => None,
        }
    }

    /// 是否为空（空白文本、空列表、非有限数值）
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::Number(n) => !n.is_finite(),
            Self::List(items) => items.iter().all(|s| s.trim().is_empty()),
        }
    }

    /// 按声明类型规整：
    /// - Text 接受文本，数值转为文本
    /// - Number 接受数值或可解析的文本
    /// - List 接受列表，单个文本视为单元素列表
    ///
    /// 空值或类型不符时返回 None。
    pub fn conform(&self, kind: FieldKind) -> Option<FieldValue> {
        if self.is_empty() {
            return None;
        }
        match (kind, self) {
            (FieldKind::Text, Self::Text(s)) => Some(Self::Text(s.trim().to_string())),
            (FieldKind::Text, Self::Number(n)) => Some(Self::Text(format_number(*n))),
            (FieldKind::Number, Self::Number(n)) => Some(Self::Number(*n)),
            (FieldKind::Number, Self::Text(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(Self::Number),
            (FieldKind::List, Self::List(items)) => {
                let items: Vec<String> = items
                    .iter()
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect();
                Some(Self::List(items))
            }
            (FieldKind::List, Self::Text(s)) => Some(Self::List(vec![s.trim().to_string()])),
            _ => None,
        }
    }

    /// 展开为字符串列表（Brief 投影用）
    pub fn to_strings(&self) -> Vec<String> {
        match self {
            Self::Text(s) => vec![s.clone()],
            Self::Number(n) => vec![format_number(*n)],
            Self::List(items) => items.clone(),
        }
    }

    /// 单行展示（system prompt / CLI 用）
    pub fn display(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => format_number(*n),
            Self::List(items) => items.join("、"),
        }
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// 单个会话中单个字段的已捕获条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldEntry {
    pub value: FieldValue,
    pub confidence: f64,
    pub updated_at: DateTime<Utc>,
}

impl FieldEntry {
    pub fn new(value: FieldValue, confidence: f64) -> Self {
        Self {
            value,
            confidence,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conform_text_from_number() {
        let v = FieldValue::Number(35.0);
        assert_eq!(v.conform(FieldKind::Text), Some(FieldValue::text("35")));
    }

    #[test]
    fn test_conform_number_from_text() {
        let v = FieldValue::text(" 42.5 ");
        assert_eq!(v.conform(FieldKind::Number), Some(FieldValue::Number(42.5)));
        assert_eq!(FieldValue::text("三十坪").conform(FieldKind::Number), None);
    }

    #[test]
    fn test_conform_list_drops_blank_items() {
        let v = FieldValue::list(["厨房", "  ", "浴室 "]);
        assert_eq!(
            v.conform(FieldKind::List),
            Some(FieldValue::list(["厨房", "浴室"]))
        );
        assert_eq!(FieldValue::list(["", " "]).conform(FieldKind::List), None);
    }

    #[test]
    fn test_list_rejected_for_text_field() {
        let v = FieldValue::list(["北欧"]);
        assert_eq!(v.conform(FieldKind::Text), None);
    }

    #[test]
    fn test_from_json_skips_null_and_objects() {
        assert_eq!(FieldValue::from_json(&serde_json::Value::Null), None);
        assert_eq!(FieldValue::from_json(&serde_json::json!({"a": 1})), None);
        assert_eq!(FieldValue::from_json(&serde_json::json!(true)), None);
        assert_eq!(
            FieldValue::from_json(&serde_json::json!(["a", 2])),
            Some(FieldValue::list(["a", "2"]))
        );
    }
}
