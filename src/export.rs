use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::client::SonarClient;
use crate::convert::convert_csv_to_xlsx;
use crate::error::{Error, Result};
use crate::fetcher::{DEFAULT_PAGE_SIZE, IssueFetcher};
use crate::flatten::flatten_issue;
use crate::models::IssueFilter;
use crate::retry::RetryPolicy;
use crate::state::{ExportState, StateStore};
use crate::summary::{SummaryReport, log_summary, summarize_csv, write_summary};
use crate::window::{DEFAULT_WINDOW_DAYS, DateRangePartitioner};
use crate::writer::{ChunkedWriter, DEFAULT_CHUNK_SIZE};

/// 出力ファイル形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Xlsx,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Xlsx => "xlsx",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "xlsx" | "excel" => Ok(OutputFormat::Xlsx),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown output format '{}', expected csv or xlsx",
                other
            ))),
        }
    }
}

/// 1プロジェクト分のエクスポート設定
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub project_key: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub window_days: u32,
    pub chunk_size: usize,
    pub format: OutputFormat,
    pub output_path: PathBuf,
    pub incremental: bool,
    pub summary: bool,
}

impl ExportOptions {
    pub fn new(project_key: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        let format = OutputFormat::default();
        Self {
            project_key: project_key.into(),
            start_date,
            end_date,
            window_days: DEFAULT_WINDOW_DAYS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            format,
            output_path: default_output_path(format),
            incremental: false,
            summary: false,
        }
    }

    pub fn window_days(mut self, days: u32) -> Self {
        self.window_days = days;
        self
    }

    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    pub fn format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn output_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_path = path.into();
        self
    }

    pub fn incremental(mut self, enabled: bool) -> Self {
        self.incremental = enabled;
        self
    }

    pub fn summary(mut self, enabled: bool) -> Self {
        self.summary = enabled;
        self
    }

    /// フェッチ中に書き込むCSVのパス
    ///
    /// xlsx出力では出力ファイルと必ず別のパスになる。
    pub fn csv_path(&self) -> PathBuf {
        match self.format {
            OutputFormat::Csv => self.output_path.clone(),
            OutputFormat::Xlsx => {
                let candidate = self.output_path.with_extension("csv");
                if candidate == self.output_path {
                    self.output_path.with_extension("partial.csv")
                } else {
                    candidate
                }
            }
        }
    }

    /// 統計レポートのパス（`<出力ファイル名>_summary.json`）
    pub fn summary_path(&self) -> PathBuf {
        summary_path_for(&self.output_path)
    }
}

/// 単一プロジェクト時のデフォルト出力先
pub fn default_output_path(format: OutputFormat) -> PathBuf {
    PathBuf::from(format!("sonarqube_issues.{}", format.extension()))
}

fn summary_path_for(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "sonarqube_issues".to_string());
    output.with_file_name(format!("{}_summary.json", stem))
}

/// エクスポート処理の状態
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ExportPhase {
    /// 待機中
    #[default]
    Idle,
    /// 期間をウィンドウに分割中
    Partitioning,
    /// ウィンドウのページを取得中
    FetchingWindow,
    /// 取得したIssueを平坦化中
    Flattening,
    /// 平坦化した行をバッファに追加中
    Buffering,
    /// 残りのバッファを書き出し中
    FinalFlush,
    /// 形式変換・統計・状態保存
    PostProcess,
    /// 完了
    Done,
    /// 中断
    Failed(String),
}

impl ExportPhase {
    pub fn is_done(&self) -> bool {
        matches!(self, ExportPhase::Done)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ExportPhase::Failed(_))
    }
}

/// 1プロジェクト分のエクスポート結果
#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub project_key: String,
    pub issue_count: usize,
    /// 出力ファイル（1件もなければ作成されない）
    pub output_path: Option<PathBuf>,
    pub summary_path: Option<PathBuf>,
    pub summary: Option<SummaryReport>,
    pub effective_start: NaiveDate,
    pub end_date: NaiveDate,
    pub windows_total: usize,
    /// 不正なレスポンスで取得を諦めたウィンドウ数
    pub windows_skipped: usize,
    pub state_saved: bool,
}

impl ExportOutcome {
    fn empty(options: &ExportOptions, effective_start: NaiveDate) -> Self {
        Self {
            project_key: options.project_key.clone(),
            issue_count: 0,
            output_path: None,
            summary_path: None,
            summary: None,
            effective_start,
            end_date: options.end_date,
            windows_total: 0,
            windows_skipped: 0,
            state_saved: false,
        }
    }
}

/// ウィンドウ分割 → 取得 → 平坦化 → 書き出し を1プロジェクト分実行する
pub struct ExportOrchestrator {
    client: SonarClient,
    state_store: Arc<dyn StateStore>,
    filter: IssueFilter,
    page_size: u32,
    retry: RetryPolicy,
    phase: ExportPhase,
}

impl ExportOrchestrator {
    pub fn new(client: SonarClient, state_store: Arc<dyn StateStore>) -> Self {
        Self {
            client,
            state_store,
            filter: IssueFilter::default(),
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
            phase: ExportPhase::Idle,
        }
    }

    pub fn filter(mut self, filter: IssueFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// 直近の実行の状態
    pub fn phase(&self) -> &ExportPhase {
        &self.phase
    }

    /// 1プロジェクト分のエクスポートを実行
    pub async fn run(&mut self, options: &ExportOptions) -> Result<ExportOutcome> {
        self.phase = ExportPhase::Idle;
        match self.run_inner(options).await {
            Ok(outcome) => {
                self.phase = ExportPhase::Done;
                Ok(outcome)
            }
            Err(e) => {
                error!(project = %options.project_key, "Export failed: {}", e);
                if options.format == OutputFormat::Xlsx && options.csv_path().exists() {
                    warn!(
                        project = %options.project_key,
                        "Rows fetched before the failure were kept in {}",
                        options.csv_path().display()
                    );
                }
                self.phase = ExportPhase::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// 増分モードでの実際の開始日
    async fn effective_start(&self, options: &ExportOptions) -> Result<(NaiveDate, bool)> {
        if !options.incremental {
            return Ok((options.start_date, false));
        }

        match self.state_store.load(&options.project_key).await? {
            Some(state) => {
                info!(
                    project = %options.project_key,
                    "Incremental export: resuming from last cutoff {} (previous run exported {} issues)",
                    state.cutoff_date,
                    state.issue_count
                );
                Ok((state.cutoff_date, true))
            }
            None => {
                info!(
                    project = %options.project_key,
                    "Incremental export: no previous state, starting from {}",
                    options.start_date
                );
                Ok((options.start_date, false))
            }
        }
    }

    async fn run_inner(&mut self, options: &ExportOptions) -> Result<ExportOutcome> {
        let (start, resumed) = self.effective_start(options).await?;

        if resumed && start >= options.end_date {
            info!(
                project = %options.project_key,
                "Already up to date: cutoff {} is not before end date {}",
                start,
                options.end_date
            );
            return Ok(ExportOutcome::empty(options, start));
        }

        self.phase = ExportPhase::Partitioning;
        let partitioner = DateRangePartitioner::new(start, options.end_date, options.window_days)?;
        let windows_total = partitioner.len();

        let fetcher = IssueFetcher::new(self.client.clone(), options.project_key.clone())
            .filter(self.filter.clone())
            .page_size(self.page_size)
            .retry_policy(self.retry.clone());

        let csv_path = options.csv_path();
        let mut writer = ChunkedWriter::new(&csv_path, options.chunk_size);
        let mut total = 0usize;
        let mut windows_skipped = 0usize;

        for window in partitioner {
            self.phase = ExportPhase::FetchingWindow;
            info!("Fetching issues from {}...", window);

            let mut pages = fetcher.pages(window);
            while let Some(page) = pages.next_page().await {
                let issues = match page {
                    Ok(issues) => issues,
                    Err(e) if e.is_window_local() => {
                        warn!(window = %window, "Skipping rest of window: {}", e);
                        windows_skipped += 1;
                        break;
                    }
                    Err(e) => return Err(e),
                };

                self.phase = ExportPhase::Flattening;
                let rows: Vec<_> = issues.iter().map(flatten_issue).collect();
                total += rows.len();

                self.phase = ExportPhase::Buffering;
                writer.append(rows);
                writer.flush_if_needed()?;

                self.phase = ExportPhase::FetchingWindow;
            }

            info!("Found {} issues so far...", total);
        }

        self.phase = ExportPhase::FinalFlush;
        writer.flush_remaining()?;

        let mut outcome = ExportOutcome::empty(options, start);
        outcome.windows_total = windows_total;
        outcome.windows_skipped = windows_skipped;

        if total == 0 {
            info!(project = %options.project_key, "No issues found.");
            return Ok(outcome);
        }

        self.phase = ExportPhase::PostProcess;
        outcome.issue_count = total;

        if options.summary {
            let report = summarize_csv(&csv_path, options.chunk_size)?;
            let summary_path = options.summary_path();
            write_summary(&report, &summary_path)?;
            log_summary(&options.project_key, &report);
            outcome.summary_path = Some(summary_path);
            outcome.summary = Some(report);
        }

        match options.format {
            OutputFormat::Csv => {}
            OutputFormat::Xlsx => {
                convert_csv_to_xlsx(&csv_path, &options.output_path, options.chunk_size)?;
                std::fs::remove_file(&csv_path)?;
            }
        }
        outcome.output_path = Some(options.output_path.clone());

        if options.incremental {
            let state = ExportState {
                project_key: options.project_key.clone(),
                cutoff_date: options.end_date,
                exported_at: Utc::now(),
                issue_count: total,
            };
            self.state_store.save(&state).await?;
            outcome.state_saved = true;
        }

        info!(
            "Export completed: {} issues exported to {}",
            total,
            options.output_path.display()
        );
        info!("Date range: {} to {}", start, options.end_date);

        Ok(outcome)
    }
}
