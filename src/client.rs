use crate::error::{Error, Result};
use crate::models::{SearchParams, SearchResponse};
use crate::retry::{AttemptError, RetryPolicy, is_transient_status, with_retry};
use base64::Engine;
use reqwest::{Client, header};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// デフォルトの検索エンドポイント
pub const DEFAULT_SEARCH_URL: &str = "http://localhost:9000/api/issues/search";

/// デフォルトのリクエストタイムアウト（秒）
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// エラーメッセージに含めるレスポンス本文の最大長
const MAX_DETAIL_LEN: usize = 500;

#[derive(Debug, Clone)]
pub struct SonarConfig {
    /// `api/issues/search` エンドポイントの完全なURL
    pub search_url: String,
    /// ユーザートークン（Basic認証のユーザー名として送る）
    pub token: String,
    /// 1リクエストあたりのタイムアウト
    pub timeout: Duration,
}

impl SonarConfig {
    pub fn new(search_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let search_url = search_url.into();
        let token = token.into();

        // URLの検証
        let _ = Url::parse(&search_url)
            .map_err(|_| Error::InvalidConfiguration(format!("Invalid search URL: {}", search_url)))?;

        if token.trim().is_empty() {
            return Err(Error::ConfigurationMissing("SONAR_TOKEN is empty".to_string()));
        }

        Ok(Self {
            search_url,
            token,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        })
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `Authorization` ヘッダーの値（トークンをユーザー名、パスワードは空）
    pub fn basic_auth_value(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD.encode(format!("{}:", self.token));
        format!("Basic {}", encoded)
    }
}

#[derive(Debug, Clone)]
pub struct SonarClient {
    pub(crate) client: Client,
    pub(crate) config: Arc<SonarConfig>,
}

impl SonarClient {
    pub fn new(config: SonarConfig) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&config.basic_auth_value())
                .map_err(|_| Error::InvalidConfiguration("Invalid auth header".to_string()))?,
        );

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::InvalidConfiguration(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &SonarConfig {
        &self.config
    }

    /// 1ページ分の検索を一度だけ実行する
    pub(crate) async fn try_search(
        &self,
        params: &SearchParams,
    ) -> std::result::Result<SearchResponse, AttemptError> {
        let response = self
            .client
            .get(&self.config.search_url)
            .query(params)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(classify_transport_error)?;

        if !(200..300).contains(&status) {
            return Err(classify_status(status, &body));
        }

        serde_json::from_str::<SearchResponse>(&body).map_err(|e| {
            AttemptError::Permanent(Error::ResponseFormat(format!(
                "{} (body: {})",
                e,
                truncate(&body)
            )))
        })
    }

    /// 一時的な失敗をリトライしながら1ページ分を検索する
    pub async fn search_issues(
        &self,
        params: &SearchParams,
        policy: &RetryPolicy,
    ) -> Result<SearchResponse> {
        with_retry(policy, |attempt| {
            debug!(attempt, page = params.page, "GET {}", self.config.search_url);
            self.try_search(params)
        })
        .await
    }
}

fn classify_status(status: u16, body: &str) -> AttemptError {
    let detail = truncate(body);
    match status {
        401 => AttemptError::Permanent(Error::Authentication(detail)),
        403 => AttemptError::Permanent(Error::PermissionDenied(detail)),
        404 => AttemptError::Permanent(Error::NotFound(detail)),
        s if is_transient_status(s) => AttemptError::Transient(format!("HTTP {}: {}", s, detail)),
        s => AttemptError::Permanent(Error::Fetch {
            attempts: 1,
            message: format!("HTTP {}: {}", s, detail),
        }),
    }
}

fn classify_transport_error(e: reqwest::Error) -> AttemptError {
    if e.is_timeout() {
        AttemptError::Transient(format!("request timed out: {}", e))
    } else if e.is_connect() {
        AttemptError::Transient(format!("connection error: {}", e))
    } else if e.is_decode() || e.is_body() {
        AttemptError::Permanent(Error::ResponseFormat(e.to_string()))
    } else {
        AttemptError::Permanent(Error::Fetch {
            attempts: 1,
            message: e.to_string(),
        })
    }
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_DETAIL_LEN {
        body.to_string()
    } else {
        let mut s: String = body.chars().take(MAX_DETAIL_LEN).collect();
        s.push_str("...");
        s
    }
}
