use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Fetch failed after {attempts} attempt(s): {message}")]
    Fetch { attempts: u32, message: String },

    #[error("Malformed response: {0}")]
    ResponseFormat(String),

    #[error("Invalid date range: start {start} is not before end {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Spreadsheet error: {0}")]
    Spreadsheet(#[from] rust_xlsxwriter::XlsxError),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl Error {
    /// 現在のウィンドウだけを諦めて次のウィンドウへ進めるエラーかどうか
    pub fn is_window_local(&self) -> bool {
        matches!(self, Error::ResponseFormat(_))
    }

    /// ネットワークアクセス前に検出される設定エラーかどうか
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfiguration(_) | Error::ConfigurationMissing(_) | Error::InvalidRange { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::SerializationError(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
