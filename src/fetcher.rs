use tracing::debug;

use crate::client::SonarClient;
use crate::error::Result;
use crate::models::{Issue, IssueFilter, SearchParams};
use crate::retry::RetryPolicy;
use crate::window::DateWindow;

/// デフォルトのページサイズ（APIの上限）
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// 1プロジェクト分のIssueをウィンドウ単位で取得する
#[derive(Debug, Clone)]
pub struct IssueFetcher {
    client: SonarClient,
    project_key: String,
    filter: IssueFilter,
    page_size: u32,
    retry: RetryPolicy,
}

impl IssueFetcher {
    pub fn new(client: SonarClient, project_key: impl Into<String>) -> Self {
        Self {
            client,
            project_key: project_key.into(),
            filter: IssueFilter::default(),
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
        }
    }

    pub fn filter(mut self, filter: IssueFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn project_key(&self) -> &str {
        &self.project_key
    }

    /// ウィンドウ・ページ番号に対応する検索パラメータ
    pub fn params_for(&self, window: &DateWindow, page: u32) -> SearchParams {
        SearchParams::new(self.project_key.clone())
            .created_after(window.created_after())
            .created_before(window.created_before())
            .page_size(self.page_size)
            .page(page)
            .filter(&self.filter)
    }

    /// ウィンドウ内のページを順に取得する遅延シーケンス
    pub fn pages(&self, window: DateWindow) -> WindowPages<'_> {
        WindowPages {
            fetcher: self,
            window,
            next: Some(1),
        }
    }

    /// ウィンドウ内のIssueをすべて取得する
    pub async fn fetch_window(&self, window: DateWindow) -> Result<Vec<Issue>> {
        let mut pages = self.pages(window);
        let mut issues = Vec::new();
        while let Some(page) = pages.next_page().await {
            issues.extend(page?);
        }
        Ok(issues)
    }
}

/// 1ウィンドウ分のページ列
///
/// ページ番号は1から始まる。返ってきた件数がページサイズ未満なら最終ページとみなす。
/// エラーを返した後は以降のページを取得しない。
pub struct WindowPages<'a> {
    fetcher: &'a IssueFetcher,
    window: DateWindow,
    next: Option<u32>,
}

impl WindowPages<'_> {
    pub fn window(&self) -> &DateWindow {
        &self.window
    }

    /// 次のページを取得する（終端なら `None`）
    pub async fn next_page(&mut self) -> Option<Result<Vec<Issue>>> {
        let page = self.next?;
        let params = self.fetcher.params_for(&self.window, page);

        match self
            .fetcher
            .client
            .search_issues(&params, &self.fetcher.retry)
            .await
        {
            Ok(response) => {
                let count = response.issues.len();
                debug!(window = %self.window, page, count, "Fetched page");
                self.next = if count < self.fetcher.page_size as usize {
                    None
                } else {
                    Some(page + 1)
                };
                Some(Ok(response.issues))
            }
            Err(e) => {
                self.next = None;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SonarConfig;
    use crate::error::Error;
    use chrono::NaiveDate;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn window() -> DateWindow {
        DateWindow::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap()
    }

    fn issues_body(prefix: &str, n: usize) -> serde_json::Value {
        let issues: Vec<_> = (0..n).map(|i| json!({"key": format!("{}-{}", prefix, i)})).collect();
        json!({ "issues": issues })
    }

    fn fetcher_for(server: &MockServer, page_size: u32) -> IssueFetcher {
        let config = SonarConfig::new(format!("{}/api/issues/search", server.uri()), "token").unwrap();
        let client = SonarClient::new(config).unwrap();
        IssueFetcher::new(client, "proj")
            .page_size(page_size)
            .retry_policy(RetryPolicy::new(3, Duration::from_millis(5)))
    }

    #[tokio::test]
    async fn test_pagination_stops_on_short_page() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/issues/search"))
            .and(query_param("p", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(issues_body("a", 2)))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/issues/search"))
            .and(query_param("p", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(issues_body("b", 2)))
            .expect(1)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/issues/search"))
            .and(query_param("p", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(issues_body("c", 1)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = fetcher_for(&mock_server, 2);
        let issues = fetcher.fetch_window(window()).await.unwrap();

        assert_eq!(issues.len(), 5);
        assert_eq!(issues[0].key.as_deref(), Some("a-0"));
        assert_eq!(issues[4].key.as_deref(), Some("c-0"));
    }

    #[tokio::test]
    async fn test_empty_page_ends_window() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(issues_body("x", 0)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = fetcher_for(&mock_server, 500);
        let mut pages = fetcher.pages(window());

        let first = pages.next_page().await.unwrap().unwrap();
        assert!(first.is_empty());
        assert!(pages.next_page().await.is_none());
    }

    #[tokio::test]
    async fn test_filters_and_window_are_sent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("componentKeys", "proj"))
            .and(query_param("createdAfter", "2024-01-01"))
            .and(query_param("createdBefore", "2024-01-31"))
            .and(query_param("ps", "100"))
            .and(query_param("severities", "BLOCKER,CRITICAL"))
            .and(query_param("statuses", "OPEN"))
            .respond_with(ResponseTemplate::new(200).set_body_json(issues_body("f", 1)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = fetcher_for(&mock_server, 100).filter(
            IssueFilter::new()
                .severities(vec!["BLOCKER".to_string(), "CRITICAL".to_string()])
                .statuses(vec!["OPEN".to_string()]),
        );

        let issues = fetcher.fetch_window(window()).await.unwrap();
        assert_eq!(issues.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_is_transparent() {
        let mock_server = MockServer::start().await;

        // 最初の2回は503、その後は成功
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .expect(2)
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(issues_body("ok", 3)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = fetcher_for(&mock_server, 500);
        let mut pages = fetcher.pages(window());

        let page = pages.next_page().await.unwrap().unwrap();
        assert_eq!(page.len(), 3);
        assert!(pages.next_page().await.is_none());
    }

    #[tokio::test]
    async fn test_error_stops_pagination() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let fetcher = fetcher_for(&mock_server, 500);
        let mut pages = fetcher.pages(window());

        let first = pages.next_page().await.unwrap();
        assert!(matches!(first, Err(Error::ResponseFormat(_))));
        assert!(pages.next_page().await.is_none());
    }
}
