use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// デフォルトのウィンドウ幅（日数）
pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// 日付ウィンドウ（`createdAfter` / `createdBefore` の組）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    /// ウィンドウの開始日
    pub start: NaiveDate,
    /// ウィンドウの終了日
    pub end: NaiveDate,
}

impl DateWindow {
    /// 新しいウィンドウを作成（start < end が必要）
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start >= end {
            return Err(Error::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// ウィンドウの日数
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// APIの `createdAfter` に渡す文字列
    pub fn created_after(&self) -> String {
        format_api_date(&self.start)
    }

    /// APIの `createdBefore` に渡す文字列
    pub fn created_before(&self) -> String {
        format_api_date(&self.end)
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} to {}", self.created_after(), self.created_before())
    }
}

/// 期間を固定幅のウィンドウに分割するイテレータ
///
/// 最初のウィンドウは `start` から始まり、各ウィンドウは直前のウィンドウの
/// 終了日から始まる。最後のウィンドウの終了日は `end` に切り詰められる。
#[derive(Debug, Clone)]
pub struct DateRangePartitioner {
    current: NaiveDate,
    end: NaiveDate,
    window: Duration,
}

impl DateRangePartitioner {
    /// 新しいパーティショナーを作成
    pub fn new(start: NaiveDate, end: NaiveDate, window_days: u32) -> Result<Self> {
        if start >= end {
            return Err(Error::InvalidRange { start, end });
        }
        if window_days == 0 {
            return Err(Error::InvalidConfiguration(
                "window size must be at least one day".to_string(),
            ));
        }

        Ok(Self {
            current: start,
            end,
            window: Duration::days(window_days as i64),
        })
    }

    /// デフォルト幅（30日）でパーティショナーを作成
    pub fn with_default_window(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        Self::new(start, end, DEFAULT_WINDOW_DAYS)
    }

    /// 残りのウィンドウ数
    pub fn remaining(&self) -> usize {
        if self.current >= self.end {
            return 0;
        }
        let span = (self.end - self.current).num_days();
        let width = self.window.num_days();
        ((span + width - 1) / width) as usize
    }
}

impl Iterator for DateRangePartitioner {
    type Item = DateWindow;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current >= self.end {
            return None;
        }

        let window_end = std::cmp::min(self.current + self.window, self.end);
        let window = DateWindow {
            start: self.current,
            end: window_end,
        };
        self.current = window_end;
        Some(window)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.remaining();
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for DateRangePartitioner {}

/// NaiveDateをAPI用の日付文字列にフォーマット
pub fn format_api_date(date: &NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// `YYYY-MM-DD` 形式の日付文字列をパース
pub fn parse_api_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|_| {
        Error::InvalidConfiguration(format!("invalid date '{}', expected YYYY-MM-DD", s))
    })
}
