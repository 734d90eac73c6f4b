use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;

/// 前回の成功したエクスポートの記録
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportState {
    /// プロジェクトキー
    pub project_key: String,
    /// 前回エクスポートの終了日（次回の開始日になる）
    #[serde(rename = "last_export_date")]
    pub cutoff_date: NaiveDate,
    /// 前回エクスポートの実行時刻
    #[serde(rename = "last_export_timestamp")]
    pub exported_at: DateTime<Utc>,
    /// 前回エクスポートしたIssue数
    pub issue_count: usize,
}

/// 増分エクスポート状態の保存先の抽象化トレイト
#[async_trait]
pub trait StateStore: Send + Sync {
    /// 状態を読み込む（未保存なら `None`）
    async fn load(&self, project_key: &str) -> Result<Option<ExportState>, Error>;

    /// 状態を保存する（既存の状態は上書き）
    async fn save(&self, state: &ExportState) -> Result<(), Error>;
}

/// プロジェクトキーをファイル名に使える形に変換
///
/// 英数字と `-` `_` `.` 以外の文字は `_` に置き換える。
pub fn sanitize_project_key(project_key: &str) -> String {
    project_key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// JSON形式のファイルベース状態ストア
#[derive(Debug, Clone)]
pub struct FileStateStore {
    /// 状態ファイルを置くディレクトリ
    state_dir: PathBuf,
}

impl FileStateStore {
    pub fn new<P: AsRef<Path>>(state_dir: P) -> Self {
        Self {
            state_dir: state_dir.as_ref().to_path_buf(),
        }
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// プロジェクトごとの状態ファイルのパス
    pub fn state_path(&self, project_key: &str) -> PathBuf {
        self.state_dir
            .join(format!(".last_export_{}.json", sanitize_project_key(project_key)))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self, project_key: &str) -> Result<Option<ExportState>, Error> {
        let path = self.state_path(project_key);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }

        let contents = fs::read_to_string(&path).await?;
        if contents.trim().is_empty() {
            return Ok(None);
        }

        let state: ExportState = serde_json::from_str(&contents).map_err(|e| {
            Error::SerializationError(format!(
                "state file {} is corrupt: {}",
                path.display(),
                e
            ))
        })?;

        Ok(Some(state))
    }

    async fn save(&self, state: &ExportState) -> Result<(), Error> {
        fs::create_dir_all(&self.state_dir).await?;

        let path = self.state_path(&state.project_key);
        let json_data = serde_json::to_string_pretty(state)?;

        // 一時ファイルに書いてからリネームで置き換える
        let tmp_path = path.with_extension("json.tmp");
        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(json_data.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp_path, &path).await?;

        Ok(())
    }
}
