pub mod app;
pub mod cli;
pub mod client;
pub mod convert;
pub mod error;
pub mod export;
pub mod fetcher;
pub mod flatten;
pub mod models;
pub mod multi;
pub mod retry;
pub mod settings;
pub mod state;
pub mod summary;
pub mod window;
pub mod writer;

pub use client::{SonarClient, SonarConfig};
pub use error::{Error, Result};
pub use models::*;

// Export pipeline re-exports
pub use export::{ExportOptions, ExportOrchestrator, ExportOutcome, ExportPhase, OutputFormat};
pub use fetcher::{IssueFetcher, WindowPages};
pub use flatten::{COLUMNS, CellValue, FlattenedIssue, flatten_issue};
pub use window::{DateRangePartitioner, DateWindow};
pub use writer::{ChunkedReader, ChunkedWriter};

// Retry re-exports
pub use retry::RetryPolicy;

// Incremental state re-exports
pub use state::{ExportState, FileStateStore, StateStore};

// Multi-project re-exports
pub use multi::{ExportResult, ExportStatus, MultiProjectReport, MultiProjectRunner};

// Post-processing re-exports
pub use convert::convert_csv_to_xlsx;
pub use summary::{SummaryReport, summarize_csv};

pub use settings::{FileSettings, LogLevel, Overrides, Settings};
