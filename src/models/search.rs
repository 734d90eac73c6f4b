use super::Issue;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// `api/issues/search` のクエリパラメータ
///
/// そのまま `reqwest` の `.query()` に渡す。`None` の項目は送らない。
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct SearchParams {
    #[serde(rename = "componentKeys")]
    pub component_keys: String,

    #[serde(rename = "createdAfter")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_after: Option<String>,

    #[serde(rename = "createdBefore")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_before: Option<String>,

    #[serde(rename = "ps")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,

    #[serde(rename = "p")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub severities: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub types: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub statuses: Option<String>,
}

/// 検索レスポンス
///
/// `issues` 配列がないボディは不正なレスポンスとして扱う。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(deserialize_with = "issue_records")]
    pub issues: Vec<Issue>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paging: Option<Paging>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Paging {
    pub page_index: u32,
    pub page_size: u32,
    pub total: u64,
}

/// `issues` 配列を1件ずつ読む。オブジェクトでない要素だけを捨てる
fn issue_records<'de, D>(deserializer: D) -> Result<Vec<Issue>, D::Error>
where
    D: Deserializer<'de>,
{
    let records = Vec::<Value>::deserialize(deserializer)?;
    let total = records.len();
    let issues: Vec<Issue> = records
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|record| serde_json::from_value(record).ok())
        .collect();
    if issues.len() < total {
        warn!("Dropped {} non-object entries from issues array", total - issues.len());
    }
    Ok(issues)
}

/// 課題の絞り込み条件（重大度・種別・ステータス）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueFilter {
    pub severities: Vec<String>,
    pub types: Vec<String>,
    pub statuses: Vec<String>,
}

impl IssueFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn severities(mut self, severities: Vec<String>) -> Self {
        self.severities = severities;
        self
    }

    pub fn types(mut self, types: Vec<String>) -> Self {
        self.types = types;
        self
    }

    pub fn statuses(mut self, statuses: Vec<String>) -> Self {
        self.statuses = statuses;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.severities.is_empty() && self.types.is_empty() && self.statuses.is_empty()
    }
}

fn join_list(values: &[String]) -> Option<String> {
    if values.is_empty() {
        None
    } else {
        Some(values.join(","))
    }
}

impl SearchParams {
    pub fn new(component_keys: impl Into<String>) -> Self {
        Self {
            component_keys: component_keys.into(),
            ..Self::default()
        }
    }

    pub fn created_after(mut self, date: impl Into<String>) -> Self {
        self.created_after = Some(date.into());
        self
    }

    pub fn created_before(mut self, date: impl Into<String>) -> Self {
        self.created_before = Some(date.into());
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn filter(mut self, filter: &IssueFilter) -> Self {
        self.severities = join_list(&filter.severities);
        self.types = join_list(&filter.types);
        self.statuses = join_list(&filter.statuses);
        self
    }
}
