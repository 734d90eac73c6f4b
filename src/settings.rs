//! 実行設定の組み立て
//!
//! 値の優先順位（高い順）:
//! 1. 環境変数（`SONAR_URL` / `SONAR_PROJECT_KEY` / `SONAR_TOKEN`）
//! 2. コマンドライン引数
//! 3. `--config` で指定したTOMLファイル
//! 4. 組み込みのデフォルト値
//!
//! 組み立てた [`Settings`] は起動時に一度だけ作られ、以降は引数として渡される。

use chrono::NaiveDate;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::client::{DEFAULT_SEARCH_URL, DEFAULT_TIMEOUT_SECS, SonarConfig};
use crate::error::{Error, Result};
use crate::export::{ExportOptions, OutputFormat, default_output_path};
use crate::fetcher::DEFAULT_PAGE_SIZE;
use crate::models::IssueFilter;
use crate::multi::{DEFAULT_OUTPUT_DIR, load_project_keys};
use crate::window::{DEFAULT_WINDOW_DAYS, parse_api_date};
use crate::writer::DEFAULT_CHUNK_SIZE;

pub const ENV_URL: &str = "SONAR_URL";
pub const ENV_PROJECT_KEY: &str = "SONAR_PROJECT_KEY";
pub const ENV_TOKEN: &str = "SONAR_TOKEN";

/// デフォルトの開始日
pub const DEFAULT_START_DATE: &str = "2000-01-01";

/// ログレベル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl LogLevel {
    /// `tracing_subscriber::EnvFilter` に渡すディレクティブ
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(Error::InvalidConfiguration(format!(
                "unknown log level '{}', expected DEBUG, INFO, WARNING or ERROR",
                other
            ))),
        }
    }
}

/// カンマ区切り文字列または配列
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ListValue {
    Joined(String),
    Items(Vec<String>),
}

impl ListValue {
    fn into_items(self) -> Vec<String> {
        match self {
            ListValue::Joined(s) => split_list(&s),
            ListValue::Items(items) => items
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SonarSection {
    pub url: Option<String>,
    pub project_key: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportSection {
    pub format: Option<String>,
    pub output: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub window_days: Option<u32>,
    pub page_size: Option<u32>,
    pub chunk_size: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub state_dir: Option<PathBuf>,
    pub incremental: Option<bool>,
    pub summary: Option<bool>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterSection {
    pub severities: Option<ListValue>,
    pub types: Option<ListValue>,
    pub statuses: Option<ListValue>,
}

/// `--config` のTOMLファイル
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileSettings {
    #[serde(default)]
    pub sonarqube: SonarSection,
    #[serde(default)]
    pub export: ExportSection,
    #[serde(default)]
    pub filters: FilterSection,
}

impl FileSettings {
    pub fn parse(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::InvalidConfiguration(format!("invalid config file: {}", e)))
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidConfiguration(format!("cannot read config file {}: {}", path.display(), e))
        })?;
        Self::parse(&contents)
    }
}

/// コマンドラインで明示された値
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub url: Option<String>,
    pub project_key: Option<String>,
    pub projects: Option<String>,
    pub format: Option<String>,
    pub output: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub window_days: Option<u32>,
    pub page_size: Option<u32>,
    pub chunk_size: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub state_dir: Option<PathBuf>,
    pub severities: Option<String>,
    pub types: Option<String>,
    pub statuses: Option<String>,
    pub incremental: bool,
    pub summary: bool,
    pub log_level: Option<String>,
}

/// 組み立て済みの実行設定
#[derive(Debug, Clone)]
pub struct Settings {
    pub search_url: String,
    pub token: String,
    pub project_key: Option<String>,
    pub projects: Option<Vec<String>>,
    pub format: OutputFormat,
    pub output: PathBuf,
    pub output_dir: PathBuf,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub window_days: u32,
    pub page_size: u32,
    pub chunk_size: usize,
    pub timeout: Duration,
    pub state_dir: PathBuf,
    pub incremental: bool,
    pub summary: bool,
    pub filter: IssueFilter,
    pub log_level: LogLevel,
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn positive<T: PartialOrd + Default + fmt::Display>(name: &str, value: T) -> Result<T> {
    if value <= T::default() {
        return Err(Error::InvalidConfiguration(format!(
            "{} must be greater than zero (got {})",
            name, value
        )));
    }
    Ok(value)
}

impl Settings {
    /// 各レイヤーから設定を組み立てる
    ///
    /// `env` は環境変数の参照関数、`today` は終了日のデフォルト。
    pub fn resolve<F>(overrides: &Overrides, file: &FileSettings, env: F, today: NaiveDate) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |name: &str| non_empty(env(name));

        let search_url = env(ENV_URL)
            .or_else(|| overrides.url.clone())
            .or_else(|| file.sonarqube.url.clone())
            .unwrap_or_else(|| DEFAULT_SEARCH_URL.to_string());

        let token = env(ENV_TOKEN)
            .or_else(|| non_empty(file.sonarqube.token.clone()))
            .ok_or_else(|| Error::ConfigurationMissing(format!("{} must be set", ENV_TOKEN)))?;

        let projects = overrides
            .projects
            .as_deref()
            .map(load_project_keys)
            .transpose()?;

        let project_key = env(ENV_PROJECT_KEY)
            .or_else(|| non_empty(overrides.project_key.clone()))
            .or_else(|| non_empty(file.sonarqube.project_key.clone()));
        if project_key.is_none() && projects.is_none() {
            return Err(Error::ConfigurationMissing(format!(
                "{} must be set (or use --projects)",
                ENV_PROJECT_KEY
            )));
        }

        let format = match overrides.format.as_ref().or(file.export.format.as_ref()) {
            Some(f) => f.parse()?,
            None => OutputFormat::default(),
        };

        let start_date = parse_api_date(
            overrides
                .start_date
                .as_deref()
                .or(file.export.start_date.as_deref())
                .unwrap_or(DEFAULT_START_DATE),
        )?;
        let end_date = match overrides.end_date.as_deref().or(file.export.end_date.as_deref()) {
            Some(s) => parse_api_date(s)?,
            None => today,
        };
        if start_date >= end_date {
            return Err(Error::InvalidRange {
                start: start_date,
                end: end_date,
            });
        }

        let window_days = positive(
            "window_days",
            overrides.window_days.or(file.export.window_days).unwrap_or(DEFAULT_WINDOW_DAYS),
        )?;
        let page_size = positive(
            "page_size",
            overrides.page_size.or(file.export.page_size).unwrap_or(DEFAULT_PAGE_SIZE),
        )?;
        let chunk_size = positive(
            "chunk_size",
            overrides.chunk_size.or(file.export.chunk_size).unwrap_or(DEFAULT_CHUNK_SIZE),
        )?;
        let timeout_secs = positive(
            "timeout_secs",
            overrides.timeout_secs.or(file.export.timeout_secs).unwrap_or(DEFAULT_TIMEOUT_SECS),
        )?;

        let list = |cli: &Option<String>, from_file: &Option<ListValue>| -> Vec<String> {
            match cli {
                Some(s) => split_list(s),
                None => from_file.clone().map(ListValue::into_items).unwrap_or_default(),
            }
        };
        let filter = IssueFilter::new()
            .severities(list(&overrides.severities, &file.filters.severities))
            .types(list(&overrides.types, &file.filters.types))
            .statuses(list(&overrides.statuses, &file.filters.statuses));

        let log_level = match overrides.log_level.as_ref().or(file.export.log_level.as_ref()) {
            Some(level) => level.parse()?,
            None => LogLevel::default(),
        };

        Ok(Self {
            search_url,
            token,
            project_key,
            projects,
            format,
            output: overrides
                .output
                .clone()
                .or_else(|| file.export.output.clone())
                .unwrap_or_else(|| default_output_path(format)),
            output_dir: overrides
                .output_dir
                .clone()
                .or_else(|| file.export.output_dir.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            start_date,
            end_date,
            window_days,
            page_size,
            chunk_size,
            timeout: Duration::from_secs(timeout_secs),
            state_dir: overrides
                .state_dir
                .clone()
                .or_else(|| file.export.state_dir.clone())
                .unwrap_or_else(|| PathBuf::from(".")),
            incremental: overrides.incremental || file.export.incremental.unwrap_or(false),
            summary: overrides.summary || file.export.summary.unwrap_or(false),
            filter,
            log_level,
        })
    }

    /// プロセスの環境変数と今日の日付で組み立てる
    pub fn from_process_env(overrides: &Overrides, file: &FileSettings) -> Result<Self> {
        Self::resolve(
            overrides,
            file,
            |name| std::env::var(name).ok(),
            chrono::Local::now().date_naive(),
        )
    }

    pub fn sonar_config(&self) -> Result<SonarConfig> {
        Ok(SonarConfig::new(self.search_url.clone(), self.token.clone())?.timeout(self.timeout))
    }

    /// 指定プロジェクト用のエクスポート設定
    pub fn export_options(&self, project_key: &str) -> ExportOptions {
        ExportOptions::new(project_key, self.start_date, self.end_date)
            .window_days(self.window_days)
            .chunk_size(self.chunk_size)
            .format(self.format)
            .output_path(self.output.clone())
            .incremental(self.incremental)
            .summary(self.summary)
    }
}
