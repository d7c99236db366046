//! 原始数据表的列排序
//!
//! 固定优先列在前；`r{block}{question}{sub}#{item}` 形式的问卷列按数值排序；
//! 其余列按字母序排在最后。

use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;

/// 始终排在最前的列
pub const PRIORITY_COLUMNS: [&str; 4] = ["assignment_id", "smallcode", "status_assignment", "link_preview"];

fn r_column_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)^r(\d)(\d{2,3})([a-z]?\d?)(?:#(\d+))?(.*)$").ok())
        .as_ref()
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum ColumnKey {
    Priority(usize),
    Question {
        block: u32,
        question: u32,
        sub: String,
        item: u64,
        suffix: String,
    },
    Other(String),
}

fn column_key(column: &str) -> ColumnKey {
    if let Some(pos) = PRIORITY_COLUMNS.iter().position(|c| *c == column) {
        return ColumnKey::Priority(pos);
    }
    match r_column_pattern().and_then(|re| re.captures(column)) {
        Some(caps) => ColumnKey::Question {
            block: caps[1].parse().unwrap_or(0),
            question: caps[2].parse().unwrap_or(0),
            sub: caps.get(3).map(|m| m.as_str().to_lowercase()).unwrap_or_default(),
            item: caps
                .get(4)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0),
            suffix: caps.get(5).map(|m| m.as_str().to_string()).unwrap_or_default(),
        },
        None => ColumnKey::Other(column.to_string()),
    }
}

/// 稳定的语义排序，输入顺序不影响结果
pub fn smart_sort_columns(columns: &[String]) -> Vec<String> {
    let mut keyed: Vec<(ColumnKey, &String)> = columns.iter().map(|c| (column_key(c), c)).collect();
    keyed.sort_by(|a, b| match a.0.cmp(&b.0) {
        Ordering::Equal => a.1.cmp(b.1),
        other => other,
    });
    keyed.into_iter().map(|(_, c)| c.clone()).collect()
}

/// 调用方指定列时只保留实际存在的列，保持调用方的顺序
pub fn select_columns(selected: &[String], available: &[String]) -> Vec<String> {
    selected
        .iter()
        .filter(|c| available.contains(c))
        .cloned()
        .collect()
}
