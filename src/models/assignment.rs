//! 任务单（assignment）及其状态历史、答案数据

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// 历史为空时的当前状态
pub const OPEN_STATUS: &str = "Open";

/// 按 smallcode 列出的任务单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub assignment_id: String,
    #[serde(default)]
    pub smallcode: String,
}

/// 状态历史中的一条记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub sequence_no: usize,
    pub assignment_id: Option<String>,
    pub date: Option<String>,
    pub status_assignment: String,
}

/// 解析 `assignment-history` 接口的响应
///
/// `data` 缺失或为空时返回空列表，由 [`current_status`] 解释为 `Open`。
pub fn parse_status_history(payload: &JsonValue) -> Vec<StatusEvent> {
    payload
        .get("data")
        .and_then(JsonValue::as_array)
        .map(|items| {
            items
                .iter()
                .enumerate()
                .map(|(i, item)| StatusEvent {
                    sequence_no: i + 1,
                    assignment_id: item.get("assignment_id").and_then(scalar_to_string),
                    date: item.get("date_created").and_then(scalar_to_string),
                    status_assignment: item
                        .get("status_alias")
                        .and_then(scalar_to_string)
                        .unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// 最新一条历史记录的状态，没有历史时为 `Open`
pub fn current_status(history: &[StatusEvent]) -> String {
    history
        .last()
        .map(|e| e.status_assignment.clone())
        .unwrap_or_else(|| OPEN_STATUS.to_string())
}

/// 详情接口中 `data.data6` 的存在状态（status keberadaan）
pub fn status_keberadaan(detail: &JsonValue) -> Option<String> {
    detail
        .get("data")
        .and_then(|d| d.get("data6"))
        .and_then(scalar_to_string)
}

/// 取出详情中 `data.data` 内嵌的 JSON 字符串里的 `answers`
pub fn detail_answers(detail: &JsonValue) -> Result<Vec<JsonValue>, String> {
    let inner = detail
        .get("data")
        .and_then(|d| d.get("data"))
        .ok_or_else(|| "missing data.data".to_string())?;

    let parsed: JsonValue = match inner {
        JsonValue::String(raw) => serde_json::from_str(raw).map_err(|e| e.to_string())?,
        JsonValue::Object(_) => inner.clone(),
        other => return Err(format!("data.data is {}", type_name(other))),
    };

    Ok(parsed
        .get("answers")
        .and_then(JsonValue::as_array)
        .cloned()
        .unwrap_or_default())
}

/// 把答案列表拍平成 `dataKey -> 文本`
///
/// - `{value, label}` 列表 → `"v. l, v. l"`
/// - 其他列表 → 元素用 `", "` 拼接
/// - 单个 `{value, label}` → `"v. l"`
/// - null → 空字符串
pub fn extract_answers(answers: &[JsonValue]) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for item in answers {
        let Some(key) = item.get("dataKey").and_then(scalar_to_string) else {
            continue;
        };
        let text = match item.get("answer") {
            None | Some(JsonValue::Null) => String::new(),
            Some(JsonValue::Array(list)) => {
                if !list.is_empty() && list.iter().all(is_coded) {
                    list.iter().map(coded_text).collect::<Vec<_>>().join(", ")
                } else {
                    list.iter().map(plain_text).collect::<Vec<_>>().join(", ")
                }
            }
            Some(obj @ JsonValue::Object(_)) => coded_text(obj),
            Some(other) => plain_text(other),
        };
        out.insert(key, text);
    }
    out
}

fn is_coded(v: &JsonValue) -> bool {
    v.get("value").is_some() && v.get("label").is_some()
}

fn coded_text(v: &JsonValue) -> String {
    let value = v.get("value").map(plain_text).unwrap_or_default();
    let label = v.get("label").map(plain_text).unwrap_or_default();
    format!("{}. {}", value, label)
}

fn plain_text(v: &JsonValue) -> String {
    match v {
        JsonValue::Null => String::new(),
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn scalar_to_string(v: &JsonValue) -> Option<String> {
    match v {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn type_name(v: &JsonValue) -> &'static str {
    match v {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}
