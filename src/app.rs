//! 組み立て済みの設定からエクスポートを実行する

use std::sync::Arc;
use tracing::{info, warn};

use crate::client::SonarClient;
use crate::error::Result;
use crate::export::ExportOrchestrator;
use crate::multi::MultiProjectRunner;
use crate::retry::RetryPolicy;
use crate::settings::Settings;
use crate::state::FileStateStore;

/// 実行結果（プロセスの終了コードに対応）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// 1件以上エクスポートした
    Exported(usize),
    /// 1件もエクスポートしなかった（失敗を含む）
    NothingExported,
}

impl ExitStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExitStatus::Exported(_) => 0,
            ExitStatus::NothingExported => 1,
        }
    }

    fn from_count(count: usize) -> Self {
        if count == 0 {
            ExitStatus::NothingExported
        } else {
            ExitStatus::Exported(count)
        }
    }
}

/// 設定に従って単一または複数プロジェクトのエクスポートを実行する
pub async fn run(settings: &Settings) -> Result<ExitStatus> {
    run_with_retry(settings, RetryPolicy::default()).await
}

pub async fn run_with_retry(settings: &Settings, retry: RetryPolicy) -> Result<ExitStatus> {
    let client = SonarClient::new(settings.sonar_config()?)?;
    let state_store = Arc::new(FileStateStore::new(&settings.state_dir));

    let mut orchestrator = ExportOrchestrator::new(client, state_store)
        .filter(settings.filter.clone())
        .page_size(settings.page_size)
        .retry_policy(retry);

    if let Some(projects) = &settings.projects {
        info!(
            "Exporting {} projects into {}",
            projects.len(),
            settings.output_dir.display()
        );
        let template = settings.export_options("");
        let mut runner = MultiProjectRunner::new(orchestrator, &settings.output_dir);
        let report = runner.run(projects, &template).await?;
        return Ok(ExitStatus::from_count(report.total_issues()));
    }

    let Some(project_key) = settings.project_key.as_deref() else {
        return Ok(ExitStatus::NothingExported);
    };

    info!("Exporting issues for project {}", project_key);
    match orchestrator.run(&settings.export_options(project_key)).await {
        Ok(outcome) => Ok(ExitStatus::from_count(outcome.issue_count)),
        Err(e) if e.is_configuration() => Err(e),
        Err(e) => {
            warn!("Export of {} did not complete: {}", project_key, e);
            Ok(ExitStatus::NothingExported)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        assert_eq!(ExitStatus::from_count(0).code(), 1);
        assert_eq!(ExitStatus::from_count(12).code(), 0);
        assert_eq!(ExitStatus::from_count(12), ExitStatus::Exported(12));
    }
}
