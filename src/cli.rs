use clap::Parser;
use std::path::PathBuf;

use crate::settings::Overrides;

/// Export SonarQube issues to CSV or Excel.
///
/// Credentials come from SONAR_URL, SONAR_PROJECT_KEY and SONAR_TOKEN
/// (a `.env` file in the working directory is loaded first).
#[derive(Debug, Parser)]
#[command(name = "sonar-export", version, about)]
pub struct Cli {
    /// Output format: csv or xlsx
    #[arg(long)]
    pub format: Option<String>,

    /// Output file (single project)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output directory (with --projects)
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// First creation date to export (YYYY-MM-DD)
    #[arg(long)]
    pub start_date: Option<String>,

    /// End of the export range, exclusive (YYYY-MM-DD, defaults to today)
    #[arg(long)]
    pub end_date: Option<String>,

    /// Comma-separated severities, e.g. BLOCKER,CRITICAL
    #[arg(long)]
    pub severities: Option<String>,

    /// Comma-separated issue types, e.g. BUG,VULNERABILITY
    #[arg(long)]
    pub types: Option<String>,

    /// Comma-separated statuses, e.g. OPEN,CONFIRMED
    #[arg(long)]
    pub statuses: Option<String>,

    /// Comma-separated project keys, or @file with one key per line
    #[arg(long)]
    pub projects: Option<String>,

    /// Only export issues created since the last successful run
    #[arg(long)]
    pub incremental: bool,

    /// Write a summary report next to the output
    #[arg(long)]
    pub summary: bool,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Log level: DEBUG, INFO, WARNING or ERROR (RUST_LOG takes precedence)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Issue search endpoint
    #[arg(long)]
    pub url: Option<String>,

    /// Project key (single project)
    #[arg(long)]
    pub project_key: Option<String>,

    /// Days per fetch window
    #[arg(long)]
    pub window_days: Option<u32>,

    /// Issues per API page
    #[arg(long)]
    pub page_size: Option<u32>,

    /// Rows buffered before each write
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Directory for incremental state files
    #[arg(long)]
    pub state_dir: Option<PathBuf>,

    /// HTTP request timeout in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

impl Cli {
    /// 設定の組み立てに渡すCLIレイヤー
    pub fn overrides(&self) -> Overrides {
        Overrides {
            url: self.url.clone(),
            project_key: self.project_key.clone(),
            projects: self.projects.clone(),
            format: self.format.clone(),
            output: self.output.clone(),
            output_dir: self.output_dir.clone(),
            start_date: self.start_date.clone(),
            end_date: self.end_date.clone(),
            window_days: self.window_days,
            page_size: self.page_size,
            chunk_size: self.chunk_size,
            timeout_secs: self.timeout_secs,
            state_dir: self.state_dir.clone(),
            severities: self.severities.clone(),
            types: self.types.clone(),
            statuses: self.statuses.clone(),
            incremental: self.incremental,
            summary: self.summary,
            log_level: self.log_level.clone(),
        }
    }
}
