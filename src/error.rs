//! Error types shared by the loader, the strategies and the exporters.

use thiserror::Error;

/// Result type alias using [`SheetError`]
pub type Result<T> = std::result::Result<T, SheetError>;

/// Everything that can go wrong between an upload and a download.
#[derive(Debug, Error)]
pub enum SheetError {
    /// The upload carried no bytes
    #[error("The uploaded file is empty")]
    EmptyUpload,

    /// Extension is not one of the spreadsheet formats we read
    #[error("Unsupported file type: {0}")]
    UnsupportedFormat(String),

    /// Password-protected workbook that could not be opened
    #[error("The workbook is encrypted: {0}")]
    Encrypted(String),

    /// Bytes could not be read as the declared format
    #[error("Could not read spreadsheet: {0}")]
    Parse(String),

    /// Workbook has no sheet with that name or index
    #[error("Sheet not found: {0}")]
    SheetNotFound(String),

    /// A keyed operation referenced a column the table does not have
    #[error("Column '{column}' not found in {table}")]
    MissingColumn { column: String, table: String },

    /// No processor registered under that name
    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    /// Merge was asked to combine zero tables
    #[error("Nothing to merge")]
    NothingToMerge,

    /// Input rejected by a workflow rule (file naming, inconsistent dates)
    #[error("{0}")]
    Validation(String),

    /// Session has no upload (or result) under that slot
    #[error("No file uploaded for '{0}'")]
    NoUpload(String),

    /// Export to xlsx failed
    #[error("Could not write workbook: {0}")]
    Write(#[from] rust_xlsxwriter::XlsxError),

    /// Export or import of csv failed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Chart rendering failed
    #[error("Could not render chart: {0}")]
    Chart(String),

    /// Invalid configuration value or file
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<calamine::Error> for SheetError {
    fn from(err: calamine::Error) -> Self {
        SheetError::Parse(err.to_string())
    }
}
