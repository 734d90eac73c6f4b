//! Issueを表形式の1行に平坦化する
//!
//! 列の集合と順序は [`COLUMNS`] で固定されている。チャンク単位で追記される
//! 出力ファイルは全行が同じ列を持たなければ壊れるため、欠けたフィールドも
//! 省略せず既定値（テキストは空文字、件数は0）で埋める。

use std::fmt;

use crate::models::{Impact, Issue};

/// 出力の列（この順序で書き出す）
pub const COLUMNS: &[&str] = &[
    "key",
    "rule",
    "severity",
    "component",
    "project",
    "line",
    "hash",
    "startLine",
    "endLine",
    "startOffset",
    "endOffset",
    "textRange",
    "flows",
    "status",
    "message",
    "effort",
    "debt",
    "author",
    "tags",
    "transitions",
    "actions",
    "comments",
    "creationDate",
    "updateDate",
    "closeDate",
    "type",
    "scope",
    "quickFixAvailable",
    "cleanCodeAttribute",
    "cleanCodeAttributeCategory",
    "impacts",
    "resolution",
];

/// 整数として書き出す列
pub const NUMERIC_COLUMNS: &[&str] = &[
    "line",
    "startLine",
    "endLine",
    "startOffset",
    "endOffset",
    "flows",
    "comments",
];

/// 列名から列番号を引く
pub fn column_index(column: &str) -> Option<usize> {
    COLUMNS.iter().position(|c| *c == column)
}

/// 平坦化後の1セルの値
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellValue {
    Text(String),
    Integer(i64),
    Empty,
}

impl CellValue {
    fn text(value: Option<&String>) -> Self {
        CellValue::Text(value.cloned().unwrap_or_default())
    }

    fn optional_integer(value: Option<i64>) -> Self {
        value.map_or(CellValue::Empty, CellValue::Integer)
    }

    fn count<T>(values: Option<&Vec<T>>) -> Self {
        CellValue::Integer(values.map_or(0, |v| v.len() as i64))
    }

    fn joined(values: Option<&Vec<String>>) -> Self {
        CellValue::Text(values.map(|v| v.join(",")).unwrap_or_default())
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            CellValue::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Text(s) => f.write_str(s),
            CellValue::Integer(n) => write!(f, "{}", n),
            CellValue::Empty => Ok(()),
        }
    }
}

/// [`COLUMNS`] と同じ順序で値を持つ1行
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenedIssue {
    values: Vec<CellValue>,
}

impl FlattenedIssue {
    pub fn get(&self, column: &str) -> Option<&CellValue> {
        column_index(column).and_then(|i| self.values.get(i))
    }

    pub fn values(&self) -> &[CellValue] {
        &self.values
    }

    /// CSVの1レコード分の文字列
    pub fn to_record(&self) -> Vec<String> {
        self.values.iter().map(|v| v.to_string()).collect()
    }
}

fn format_impacts(impacts: Option<&Vec<Impact>>) -> String {
    impacts
        .map(|list| {
            list.iter()
                .map(|imp| {
                    format!(
                        "{}:{}",
                        imp.software_quality.as_deref().unwrap_or_default(),
                        imp.severity.as_deref().unwrap_or_default()
                    )
                })
                .collect::<Vec<_>>()
                .join("; ")
        })
        .unwrap_or_default()
}

fn format_bool(value: Option<bool>) -> CellValue {
    match value {
        Some(b) => CellValue::Text(b.to_string()),
        None => CellValue::Text(String::new()),
    }
}

/// Issueを平坦化する（失敗しない）
pub fn flatten_issue(issue: &Issue) -> FlattenedIssue {
    let range = issue.text_range.as_ref();
    let range_repr = range
        .and_then(|r| serde_json::to_string(r).ok())
        .unwrap_or_default();

    let values = vec![
        CellValue::text(issue.key.as_ref()),
        CellValue::text(issue.rule.as_ref()),
        CellValue::text(issue.severity.as_ref()),
        CellValue::text(issue.component.as_ref()),
        CellValue::text(issue.project.as_ref()),
        CellValue::optional_integer(issue.line),
        CellValue::text(issue.hash.as_ref()),
        CellValue::optional_integer(range.and_then(|r| r.start_line)),
        CellValue::optional_integer(range.and_then(|r| r.end_line)),
        CellValue::optional_integer(range.and_then(|r| r.start_offset)),
        CellValue::optional_integer(range.and_then(|r| r.end_offset)),
        CellValue::Text(range_repr),
        CellValue::count(issue.flows.as_ref()),
        CellValue::text(issue.status.as_ref()),
        CellValue::text(issue.message.as_ref()),
        CellValue::text(issue.effort.as_ref()),
        CellValue::text(issue.debt.as_ref()),
        CellValue::text(issue.author.as_ref()),
        CellValue::joined(issue.tags.as_ref()),
        CellValue::joined(issue.transitions.as_ref()),
        CellValue::joined(issue.actions.as_ref()),
        CellValue::count(issue.comments.as_ref()),
        CellValue::text(issue.creation_date.as_ref()),
        CellValue::text(issue.update_date.as_ref()),
        CellValue::text(issue.close_date.as_ref()),
        CellValue::text(issue.issue_type.as_ref()),
        CellValue::text(issue.scope.as_ref()),
        format_bool(issue.quick_fix_available),
        CellValue::text(issue.clean_code_attribute.as_ref()),
        CellValue::text(issue.clean_code_attribute_category.as_ref()),
        CellValue::Text(format_impacts(issue.impacts.as_ref())),
        CellValue::text(issue.resolution.as_ref()),
    ];

    debug_assert_eq!(values.len(), COLUMNS.len());
    FlattenedIssue { values }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn issue_from(value: serde_json::Value) -> Issue {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_flatten_issue_basic() {
        let issue = issue_from(json!({
            "key": "TEST-123",
            "rule": "typescript:S1234",
            "severity": "MAJOR",
            "component": "test:src/file.ts",
            "message": "Test issue message",
            "tags": ["bug", "security"],
            "comments": [{"text": "comment1"}, {"text": "comment2"}],
            "flows": [],
            "textRange": {
                "startLine": 10,
                "endLine": 15,
                "startOffset": 5,
                "endOffset": 20
            },
            "impacts": [
                {"softwareQuality": "MAINTAINABILITY", "severity": "MEDIUM"},
                {"softwareQuality": "SECURITY", "severity": "HIGH"}
            ],
            "quickFixAvailable": false
        }));

        let row = flatten_issue(&issue);

        assert_eq!(row.get("key"), Some(&CellValue::Text("TEST-123".to_string())));
        assert_eq!(row.get("rule"), Some(&CellValue::Text("typescript:S1234".to_string())));
        assert_eq!(row.get("startLine"), Some(&CellValue::Integer(10)));
        assert_eq!(row.get("endLine"), Some(&CellValue::Integer(15)));
        assert_eq!(row.get("tags"), Some(&CellValue::Text("bug,security".to_string())));
        assert_eq!(row.get("comments"), Some(&CellValue::Integer(2)));
        assert_eq!(row.get("flows"), Some(&CellValue::Integer(0)));
        assert_eq!(
            row.get("impacts"),
            Some(&CellValue::Text("MAINTAINABILITY:MEDIUM; SECURITY:HIGH".to_string()))
        );
        assert_eq!(row.get("quickFixAvailable"), Some(&CellValue::Text("false".to_string())));
        assert_eq!(
            row.get("textRange").unwrap().to_string(),
            r#"{"startLine":10,"endLine":15,"startOffset":5,"endOffset":20}"#
        );
    }

    #[test]
    fn test_flatten_issue_missing_fields() {
        let issue = issue_from(json!({
            "key": "TEST-456",
            "rule": "typescript:S5678"
        }));

        let row = flatten_issue(&issue);

        assert_eq!(row.values().len(), COLUMNS.len());
        assert_eq!(row.get("severity"), Some(&CellValue::Text(String::new())));
        assert_eq!(row.get("tags"), Some(&CellValue::Text(String::new())));
        assert_eq!(row.get("comments"), Some(&CellValue::Integer(0)));
        assert_eq!(row.get("flows"), Some(&CellValue::Integer(0)));
        assert_eq!(row.get("line"), Some(&CellValue::Empty));
        assert_eq!(row.get("textRange"), Some(&CellValue::Text(String::new())));
        assert_eq!(row.get("impacts"), Some(&CellValue::Text(String::new())));
    }

    #[test]
    fn test_flatten_empty_issue_is_total() {
        let row = flatten_issue(&Issue::default());
        assert_eq!(row.to_record().len(), COLUMNS.len());
        assert!(row.to_record().iter().enumerate().all(|(i, v)| {
            // 件数列以外はすべて空
            if COLUMNS[i] == "flows" || COLUMNS[i] == "comments" {
                v == "0"
            } else {
                v.is_empty()
            }
        }));
    }

    #[test]
    fn test_flatten_is_idempotent() {
        let issue = issue_from(json!({
            "key": "K",
            "transitions": ["confirm", "resolve"],
            "actions": ["comment"],
            "line": 3
        }));

        let first = flatten_issue(&issue);
        let second = flatten_issue(&issue);

        assert_eq!(first, second);
        assert_eq!(first.get("transitions").unwrap().to_string(), "confirm,resolve");
        assert_eq!(first.get("line").unwrap().as_integer(), Some(3));
    }

    #[test]
    fn test_column_index() {
        assert_eq!(column_index("key"), Some(0));
        assert_eq!(column_index("resolution"), Some(COLUMNS.len() - 1));
        assert_eq!(column_index("nope"), None);
        for numeric in NUMERIC_COLUMNS {
            assert!(column_index(numeric).is_some());
        }
    }
}
