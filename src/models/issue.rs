use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// `api/issues/search` が返すIssue
///
/// 既知フィールドはすべて省略可能。型が合わない値は `None` になり、
/// Issue全体の読み込みは失敗しない。未知のフィールドは `extra` に保持する。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, deserialize_with = "lenient_integer", skip_serializing_if = "Option::is_none")]
    pub line: Option<i64>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub text_range: Option<TextRange>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub flows: Option<Vec<serde_json::Value>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub effort: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub debt: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, deserialize_with = "lenient_strings", skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_strings", skip_serializing_if = "Option::is_none")]
    pub transitions: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient_strings", skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<String>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<serde_json::Value>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub update_date: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub close_date: Option<String>,
    #[serde(rename = "type")]
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub issue_type: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub quick_fix_available: Option<bool>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub clean_code_attribute: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub clean_code_attribute_category: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub impacts: Option<Vec<Impact>>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,

    // 未知のフィールドは動的に保持
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextRange {
    #[serde(default, deserialize_with = "lenient_integer", skip_serializing_if = "Option::is_none")]
    pub start_line: Option<i64>,
    #[serde(default, deserialize_with = "lenient_integer", skip_serializing_if = "Option::is_none")]
    pub end_line: Option<i64>,
    #[serde(default, deserialize_with = "lenient_integer", skip_serializing_if = "Option::is_none")]
    pub start_offset: Option<i64>,
    #[serde(default, deserialize_with = "lenient_integer", skip_serializing_if = "Option::is_none")]
    pub end_offset: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Impact {
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub software_quality: Option<String>,
    #[serde(default, deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

/// 型が合わない値を `None` として読む
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

/// 整数、または整数として読める文字列
fn lenient_integer<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// 文字列の配列。文字列以外の要素は捨てる
fn lenient_strings<'de, D>(deserializer: D) -> Result<Option<Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => Some(
            items
                .into_iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s),
                    _ => None,
                })
                .collect(),
        ),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_issue_deserialization() {
        let json_data = json!({
            "key": "AYx1",
            "rule": "typescript:S1234",
            "severity": "MAJOR",
            "component": "proj:src/file.ts",
            "project": "proj",
            "line": 12,
            "textRange": {
                "startLine": 12,
                "endLine": 14,
                "startOffset": 4,
                "endOffset": 30
            },
            "flows": [],
            "status": "OPEN",
            "message": "Remove this unused import",
            "tags": ["unused"],
            "comments": [],
            "creationDate": "2024-01-10T09:15:00+0000",
            "type": "CODE_SMELL",
            "impacts": [
                {"softwareQuality": "MAINTAINABILITY", "severity": "LOW"}
            ],
            "messageFormattings": []
        });

        let issue: Issue = serde_json::from_value(json_data).unwrap();

        assert_eq!(issue.key.as_deref(), Some("AYx1"));
        assert_eq!(issue.issue_type.as_deref(), Some("CODE_SMELL"));
        assert_eq!(issue.text_range.as_ref().unwrap().end_line, Some(14));
        assert_eq!(issue.impacts.as_ref().unwrap()[0].severity.as_deref(), Some("LOW"));
        assert!(issue.extra.contains_key("messageFormattings"));
    }

    #[test]
    fn test_mistyped_fields_fall_back_to_none() {
        let issue: Issue = serde_json::from_value(json!({
            "key": "AYx3",
            "line": "12",
            "tags": [null, "security", 7],
            "textRange": {"startLine": "abc", "endLine": 3},
            "quickFixAvailable": "yes",
            "severity": 4,
            "flows": {"not": "a list"},
            "impacts": "HIGH"
        }))
        .unwrap();

        assert_eq!(issue.key.as_deref(), Some("AYx3"));
        assert_eq!(issue.line, Some(12));
        assert_eq!(issue.tags, Some(vec!["security".to_string()]));
        let range = issue.text_range.unwrap();
        assert_eq!(range.start_line, None);
        assert_eq!(range.end_line, Some(3));
        assert!(issue.quick_fix_available.is_none());
        assert!(issue.severity.is_none());
        assert!(issue.flows.is_none());
        assert!(issue.impacts.is_none());
    }

    #[test]
    fn test_issue_tolerates_missing_and_null_fields() {
        let issue: Issue = serde_json::from_value(json!({
            "key": "AYx2",
            "tags": null,
            "textRange": null
        }))
        .unwrap();

        assert_eq!(issue.key.as_deref(), Some("AYx2"));
        assert!(issue.tags.is_none());
        assert!(issue.text_range.is_none());
        assert!(issue.rule.is_none());
    }
}
