//! 一時的なAPI障害に対する指数バックオフ付きリトライ
//!
//! 429 と 5xx 系の一部、タイムアウト、接続エラーは時間をおけば解消するため
//! 再試行する。認証エラーや不正なレスポンスは何度試しても結果が変わらないので
//! 即座に呼び出し元へ返す。

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{Error, Result};

/// リトライ対象のHTTPステータス
pub const TRANSIENT_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// リトライ動作の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大試行回数（初回を含む）
    pub max_attempts: u32,
    /// 最初のリトライまでの待ち時間
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// `retry` 回目のリトライ前の待ち時間（1始まり）
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// 一回の試行の失敗
#[derive(Debug)]
pub enum AttemptError {
    /// 再試行すれば成功しうる失敗
    Transient(String),
    /// 再試行しても無駄な失敗
    Permanent(Error),
}

pub fn is_transient_status(status: u16) -> bool {
    TRANSIENT_STATUSES.contains(&status)
}

/// `op` を `policy` に従って実行する
///
/// 一時的な失敗は予算内で吸収され、予算を使い切ると最後の失敗内容を持つ
/// [`Error::Fetch`] になる。恒久的な失敗はそのまま返る。
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, AttemptError>>,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(AttemptError::Permanent(err)) => return Err(err),
            Err(AttemptError::Transient(message)) => {
                if attempt >= policy.max_attempts {
                    return Err(Error::Fetch {
                        attempts: attempt,
                        message,
                    });
                }
                let delay = policy.delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Transient failure: {}; retrying",
                    message
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
