//! Error types for medication ingestion

use std::path::PathBuf;

/// Result type for ingestion operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Coarse classification of an [`IngestError`]
///
/// Callers translating failures into their own signals (exit codes, HTTP
/// statuses) match on this instead of on individual variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ExtractionProcess,
    StreamParse,
    EnrichmentFetch,
    Persistence,
    NotFound,
    Config,
    Conversion,
}

/// Error types for the ingestion pipeline
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("Failed to launch extractor '{program}': {source}")]
    ExtractorLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Extractor exited with code {0}")]
    ExtractorExit(i32),

    #[error("Extractor was terminated by a signal")]
    ExtractorTerminated,

    #[error("Extractor did not finish within {0} seconds")]
    ExtractorTimeout(u64),

    #[error("Extractor I/O error: {0}")]
    ExtractorIo(#[source] std::io::Error),

    #[error("Failed to read {}: {source}", path.display())]
    StreamIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed JSON document: {0}")]
    MalformedDocument(#[from] serde_json::Error),

    #[error("Invalid record path '{0}'")]
    RecordPath(String),

    #[error("Document reader stopped unexpectedly: {0}")]
    ParserWorker(String),

    #[error("Spreadsheet request failed: {0}")]
    EnrichmentRequest(#[from] reqwest::Error),

    #[error("Spreadsheet API returned {status}: {message}")]
    EnrichmentStatus { status: u16, message: String },

    #[error("Unexpected spreadsheet response: {0}")]
    EnrichmentResponse(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Conversion error: {0}")]
    Conversion(String),
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::ExtractorLaunch { .. }
            | IngestError::ExtractorExit(_)
            | IngestError::ExtractorTerminated
            | IngestError::ExtractorTimeout(_)
            | IngestError::ExtractorIo(_) => ErrorKind::ExtractionProcess,
            IngestError::StreamIo { .. }
            | IngestError::MalformedDocument(_)
            | IngestError::RecordPath(_)
            | IngestError::ParserWorker(_) => ErrorKind::StreamParse,
            IngestError::EnrichmentRequest(_)
            | IngestError::EnrichmentStatus { .. }
            | IngestError::EnrichmentResponse(_) => ErrorKind::EnrichmentFetch,
            IngestError::Database(_) | IngestError::Migration(_) => ErrorKind::Persistence,
            IngestError::NotFound(_) => ErrorKind::NotFound,
            IngestError::Config(_) => ErrorKind::Config,
            IngestError::Conversion(_) => ErrorKind::Conversion,
        }
    }

    /// Exit code of the extraction process, when it ran to completion
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            IngestError::ExtractorExit(code) => Some(*code),
            _ => None,
        }
    }
}

impl From<quick_xml::Error> for IngestError {
    fn from(err: quick_xml::Error) -> Self {
        IngestError::Conversion(err.to_string())
    }
}

impl From<zip::result::ZipError> for IngestError {
    fn from(err: zip::result::ZipError) -> Self {
        IngestError::Conversion(err.to_string())
    }
}
