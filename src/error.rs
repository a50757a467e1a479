use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Which of the two remote calls an extraction failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parse,
    Extract,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Parse => f.write_str("parse"),
            Stage::Extract => f.write_str("extract"),
        }
    }
}

/// Errors surfaced by an [`Extractor`](crate::extract::Extractor) for one file.
///
/// Remote failures carry the status code and the body exactly as the
/// service returned them so the caller can show the diagnostic verbatim.
#[derive(Debug, Clone, Error)]
pub enum ExtractionError {
    /// No API key was configured; no request was sent.
    #[error("API key is required")]
    MissingApiKey,
    /// The parse endpoint answered with a non-success status.
    #[error("Failed to parse PDF ({status}): {body}")]
    Parse { status: u16, body: String },
    /// The extract endpoint answered with a non-success status.
    #[error("Failed to extract data ({status}): {body}")]
    Extract { status: u16, body: String },
    /// The request never produced an HTTP response.
    #[error("{stage} request failed: {message}")]
    Transport { stage: Stage, message: String },
    /// A success response whose body could not be used.
    #[error("unexpected {stage} response: {message}")]
    InvalidResponse { stage: Stage, message: String },
    /// The whole parse + extract attempt ran past the configured limit.
    #[error("extraction timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    /// The caller dropped the processing future before the attempt finished.
    #[error("extraction cancelled")]
    Cancelled,
}

impl ExtractionError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ExtractionError::Parse { status, .. } | ExtractionError::Extract { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    /// Caller input rejected before any work happened.
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    /// Saving or loading a named field configuration failed.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("spreadsheet error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
