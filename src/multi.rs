use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::error::{Error, Result};
use crate::export::{ExportOptions, ExportOrchestrator};
use crate::state::sanitize_project_key;

/// 複数プロジェクト時のデフォルト出力ディレクトリ
pub const DEFAULT_OUTPUT_DIR: &str = "multi_project_export";

/// 集約レポートのファイル名
pub const REPORT_FILE_NAME: &str = "export_summary.json";

/// `--projects` の値からプロジェクトキー一覧を読み込む
///
/// `@path` ならファイルから1行1キーで読み込み（`#` で始まる行と空行は無視）、
/// それ以外はカンマ区切りのリストとして扱う。
pub fn load_project_keys(arg: &str) -> Result<Vec<String>> {
    let keys: Vec<String> = match arg.strip_prefix('@') {
        Some(path) => {
            let contents = std::fs::read_to_string(path).map_err(|e| {
                Error::InvalidConfiguration(format!("cannot read project list {}: {}", path, e))
            })?;
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string)
                .collect()
        }
        None => arg
            .split(',')
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .collect(),
    };

    if keys.is_empty() {
        return Err(Error::InvalidConfiguration(
            "no project keys given".to_string(),
        ));
    }
    Ok(keys)
}

/// プロジェクトごとの結果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportResult {
    pub status: ExportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<PathBuf>,
}

impl ExportResult {
    pub fn success(count: usize, output_file: Option<PathBuf>) -> Self {
        Self {
            status: ExportStatus::Success,
            count: Some(count),
            error: None,
            output_file,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: ExportStatus::Failed,
            count: None,
            error: Some(error.into()),
            output_file: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExportStatus::Success
    }
}

/// 複数プロジェクト実行の集約レポート
#[derive(Debug, Clone)]
pub struct MultiProjectReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// 入力順の (プロジェクトキー, 結果)
    pub results: Vec<(String, ExportResult)>,
}

/// JSONとして保存する形
#[derive(Debug, Serialize, Deserialize)]
pub struct PersistedReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub successful: usize,
    pub failed: usize,
    pub total_issues: usize,
    pub projects: BTreeMap<String, ExportResult>,
}

impl MultiProjectReport {
    pub fn get(&self, project_key: &str) -> Option<&ExportResult> {
        self.results
            .iter()
            .find(|(key, _)| key == project_key)
            .map(|(_, result)| result)
    }

    pub fn successful(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.successful()
    }

    pub fn total_issues(&self) -> usize {
        self.results.iter().filter_map(|(_, r)| r.count).sum()
    }

    pub fn to_persisted(&self) -> PersistedReport {
        PersistedReport {
            started_at: self.started_at,
            finished_at: self.finished_at,
            successful: self.successful(),
            failed: self.failed(),
            total_issues: self.total_issues(),
            projects: self.results.iter().cloned().collect(),
        }
    }

    /// JSONで保存
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.to_persisted())?;
        std::fs::write(path.as_ref(), json)?;
        Ok(())
    }
}

/// プロジェクトを1件ずつ順番にエクスポートする
pub struct MultiProjectRunner {
    orchestrator: ExportOrchestrator,
    output_dir: PathBuf,
}

impl MultiProjectRunner {
    pub fn new(orchestrator: ExportOrchestrator, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            orchestrator,
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn report_path(&self) -> PathBuf {
        self.output_dir.join(REPORT_FILE_NAME)
    }

    /// プロジェクトごとの出力ファイルのパス
    pub fn output_path_for(&self, project_key: &str, template: &ExportOptions) -> PathBuf {
        self.output_dir.join(format!(
            "{}_issues.{}",
            sanitize_project_key(project_key),
            template.format.extension()
        ))
    }

    /// 全プロジェクトを実行する
    ///
    /// あるプロジェクトの失敗はそのプロジェクトの結果として記録され、
    /// 後続のプロジェクトの処理は続行される。
    pub async fn run(&mut self, project_keys: &[String], template: &ExportOptions) -> Result<MultiProjectReport> {
        std::fs::create_dir_all(&self.output_dir)?;

        let started_at = Utc::now();
        let mut results = Vec::with_capacity(project_keys.len());

        for (index, project_key) in project_keys.iter().enumerate() {
            info!(
                "[{}/{}] Exporting project {}",
                index + 1,
                project_keys.len(),
                project_key
            );

            let mut options = template.clone();
            options.project_key = project_key.clone();
            options.output_path = self.output_path_for(project_key, template);

            let result = match self.orchestrator.run(&options).await {
                Ok(outcome) => ExportResult::success(outcome.issue_count, outcome.output_path),
                Err(e) => {
                    error!(project = %project_key, "Project export failed: {}", e);
                    ExportResult::failure(e.to_string())
                }
            };
            results.push((project_key.clone(), result));
        }

        let report = MultiProjectReport {
            started_at,
            finished_at: Utc::now(),
            results,
        };

        let report_path = self.report_path();
        report.write_json(&report_path)?;
        info!(
            "Multi-project export finished: {} succeeded, {} failed, {} issues total (report: {})",
            report.successful(),
            report.failed(),
            report.total_issues(),
            report_path.display()
        );

        Ok(report)
    }
}
