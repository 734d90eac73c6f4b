use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::writer::ChunkedReader;

/// 上位何件のルールを集計するか
pub const TOP_RULES: usize = 10;

/// 集計の1項目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountEntry {
    pub value: String,
    pub count: usize,
    pub percentage: f64,
}

/// エクスポート結果の統計レポート
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryReport {
    pub total_issues: usize,
    pub by_severity: Vec<CountEntry>,
    pub by_type: Vec<CountEntry>,
    pub by_status: Vec<CountEntry>,
    pub top_rules: Vec<CountEntry>,
    pub earliest_created: Option<String>,
    pub latest_created: Option<String>,
}

/// 行を1件ずつ受け取って集計する
#[derive(Debug, Default)]
pub struct SummaryBuilder {
    total: usize,
    severities: HashMap<String, usize>,
    types: HashMap<String, usize>,
    statuses: HashMap<String, usize>,
    rules: HashMap<String, usize>,
    earliest: Option<String>,
    latest: Option<String>,
}

impl SummaryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, severity: &str, issue_type: &str, status: &str, rule: &str, created: &str) {
        self.total += 1;
        *self.severities.entry(severity.to_string()).or_default() += 1;
        *self.types.entry(issue_type.to_string()).or_default() += 1;
        *self.statuses.entry(status.to_string()).or_default() += 1;
        if !rule.is_empty() {
            *self.rules.entry(rule.to_string()).or_default() += 1;
        }

        // ISO-8601 文字列は辞書順が時系列順と一致する
        if !created.is_empty() {
            if self.earliest.as_deref().is_none_or(|e| created < e) {
                self.earliest = Some(created.to_string());
            }
            if self.latest.as_deref().is_none_or(|l| created > l) {
                self.latest = Some(created.to_string());
            }
        }
    }

    pub fn build(self) -> SummaryReport {
        let total = self.total;
        let mut top_rules = ranked(self.rules, total);
        top_rules.truncate(TOP_RULES);

        SummaryReport {
            total_issues: total,
            by_severity: ranked(self.severities, total),
            by_type: ranked(self.types, total),
            by_status: ranked(self.statuses, total),
            top_rules,
            earliest_created: self.earliest,
            latest_created: self.latest,
        }
    }
}

fn ranked(counts: HashMap<String, usize>, total: usize) -> Vec<CountEntry> {
    let mut entries: Vec<CountEntry> = counts
        .into_iter()
        .map(|(value, count)| CountEntry {
            value,
            count,
            percentage: percentage(count, total),
        })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    entries
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let raw = count as f64 * 100.0 / total as f64;
    (raw * 100.0).round() / 100.0
}

/// 書き出し済みのCSVをチャンク単位で読み戻して集計する
pub fn summarize_csv<P: AsRef<Path>>(csv_path: P, chunk_size: usize) -> Result<SummaryReport> {
    let reader = ChunkedReader::open(csv_path, chunk_size)?;
    let severity = reader.column("severity")?;
    let issue_type = reader.column("type")?;
    let status = reader.column("status")?;
    let rule = reader.column("rule")?;
    let created = reader.column("creationDate")?;

    let mut builder = SummaryBuilder::new();
    for chunk in reader {
        for record in chunk? {
            builder.record(
                record.get(severity).unwrap_or_default(),
                record.get(issue_type).unwrap_or_default(),
                record.get(status).unwrap_or_default(),
                record.get(rule).unwrap_or_default(),
                record.get(created).unwrap_or_default(),
            );
        }
    }

    Ok(builder.build())
}

/// レポートをJSONで保存
pub fn write_summary<P: AsRef<Path>>(report: &SummaryReport, path: P) -> Result<()> {
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(path.as_ref(), json)?;
    Ok(())
}

/// レポートの要点をログに出す
pub fn log_summary(project_key: &str, report: &SummaryReport) {
    info!(project = project_key, total = report.total_issues, "Summary");
    for (label, entries) in [
        ("severity", &report.by_severity),
        ("type", &report.by_type),
        ("status", &report.by_status),
    ] {
        for entry in entries {
            info!(
                "  {} {}: {} ({:.2}%)",
                label,
                display_value(&entry.value),
                entry.count,
                entry.percentage
            );
        }
    }
    for (rank, entry) in report.top_rules.iter().enumerate() {
        info!("  top rule #{} {}: {}", rank + 1, entry.value, entry.count);
    }
    if let (Some(earliest), Some(latest)) = (&report.earliest_created, &report.latest_created) {
        info!("  created between {} and {}", earliest, latest);
    }
}

fn display_value(value: &str) -> &str {
    if value.is_empty() { "(none)" } else { value }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flatten::flatten_issue;
    use crate::models::Issue;
    use crate::writer::ChunkedWriter;
    use tempfile::TempDir;

    fn issue(severity: &str, issue_type: &str, status: &str, rule: &str, created: &str) -> Issue {
        Issue {
            severity: Some(severity.to_string()),
            issue_type: Some(issue_type.to_string()),
            status: Some(status.to_string()),
            rule: Some(rule.to_string()),
            creation_date: Some(created.to_string()),
            ..Issue::default()
        }
    }

    #[test]
    fn test_builder_counts_and_percentages() {
        let mut builder = SummaryBuilder::new();
        builder.record("MAJOR", "BUG", "OPEN", "java:S1", "2024-01-03T00:00:00+0000");
        builder.record("MAJOR", "CODE_SMELL", "OPEN", "java:S1", "2024-01-01T00:00:00+0000");
        builder.record("MINOR", "CODE_SMELL", "CLOSED", "java:S2", "2024-02-01T00:00:00+0000");
        builder.record("MAJOR", "CODE_SMELL", "OPEN", "", "");

        let report = builder.build();

        assert_eq!(report.total_issues, 4);
        assert_eq!(report.by_severity[0].value, "MAJOR");
        assert_eq!(report.by_severity[0].count, 3);
        assert_eq!(report.by_severity[0].percentage, 75.0);
        assert_eq!(report.by_severity[1].percentage, 25.0);
        assert_eq!(report.by_type[0].value, "CODE_SMELL");
        assert_eq!(report.by_status[1].value, "CLOSED");
        assert_eq!(report.top_rules.len(), 2);
        assert_eq!(report.top_rules[0].value, "java:S1");
        assert_eq!(report.earliest_created.as_deref(), Some("2024-01-01T00:00:00+0000"));
        assert_eq!(report.latest_created.as_deref(), Some("2024-02-01T00:00:00+0000"));
    }

    #[test]
    fn test_top_rules_are_capped() {
        let mut builder = SummaryBuilder::new();
        for i in 0..15 {
            for _ in 0..=i {
                builder.record("MAJOR", "BUG", "OPEN", &format!("rule:{:02}", i), "");
            }
        }

        let report = builder.build();

        assert_eq!(report.top_rules.len(), TOP_RULES);
        assert_eq!(report.top_rules[0].value, "rule:14");
        assert_eq!(report.top_rules[0].count, 15);
        assert_eq!(report.top_rules[9].value, "rule:05");
    }

    #[test]
    fn test_empty_report() {
        let report = SummaryBuilder::new().build();
        assert_eq!(report.total_issues, 0);
        assert!(report.by_severity.is_empty());
        assert!(report.earliest_created.is_none());
    }

    #[test]
    fn test_summarize_csv() {
        let temp_dir = TempDir::new().unwrap();
        let csv_path = temp_dir.path().join("issues.csv");
        let mut writer = ChunkedWriter::new(&csv_path, 2);
        writer.append(
            [
                issue("BLOCKER", "BUG", "OPEN", "r:1", "2023-05-01T10:00:00+0000"),
                issue("BLOCKER", "VULNERABILITY", "OPEN", "r:1", "2023-04-01T10:00:00+0000"),
                issue("INFO", "BUG", "RESOLVED", "r:2", "2023-06-01T10:00:00+0000"),
            ]
            .iter()
            .map(flatten_issue),
        );
        writer.flush_remaining().unwrap();

        let report = summarize_csv(&csv_path, 1).unwrap();

        assert_eq!(report.total_issues, 3);
        assert_eq!(report.by_severity[0].value, "BLOCKER");
        assert_eq!(report.by_severity[0].count, 2);
        assert_eq!(report.by_severity[0].percentage, 66.67);
        assert_eq!(report.by_type[0].value, "BUG");
        assert_eq!(report.earliest_created.as_deref(), Some("2023-04-01T10:00:00+0000"));

        let summary_path = temp_dir.path().join("issues_summary.json");
        write_summary(&report, &summary_path).unwrap();
        let loaded: SummaryReport =
            serde_json::from_str(&std::fs::read_to_string(&summary_path).unwrap()).unwrap();
        assert_eq!(loaded, report);
    }
}
