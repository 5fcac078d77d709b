//! Ingestion configuration
//!
//! Everything the pipeline needs is read from environment variables (a `.env`
//! file is honoured). Each section validates itself so that commands which only
//! touch one stage, such as `medsync extract`, do not demand credentials for the
//! others.

use crate::error::{IngestError, Result};
use crate::extractor::ExtractorCommand;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/medsync";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default location of the archive conversion executable.
pub const DEFAULT_EXTRACTOR_PATH: &str = "zipped-xml-to-json";

/// File name of the converted document inside the temp directory.
pub const DEFAULT_JSON_FILE_NAME: &str = "drugbank-data.json";

/// Path of the drug entries inside the converted document.
pub const DEFAULT_RECORD_PATH: &str = "drugbank.drug.*";

/// Progress line refresh cadence, in records.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 50;

/// Google Sheets API root.
pub const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com/v4";

/// Rows per INSERT statement during the bulk load.
pub const DEFAULT_INSERT_CHUNK_SIZE: usize = 500;

/// Parameters bound per medication row in the bulk INSERT.
pub const INSERT_BINDS_PER_ROW: usize = 6;

/// Largest chunk that stays within PostgreSQL's 65535 bind parameters per statement.
pub const MAX_INSERT_CHUNK_SIZE: usize = u16::MAX as usize / INSERT_BINDS_PER_ROW;

/// Complete ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub database: DatabaseConfig,
    pub archive: ArchiveConfig,
    pub spreadsheet: SpreadsheetConfig,
    pub insert_chunk_size: usize,
}

/// Database connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

/// Archive extraction and parsing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// ZIP archive containing the XML export
    pub zip_path: PathBuf,

    /// Name of the XML entry inside the archive
    pub xml_entry: String,

    /// Where the converter writes its JSON output
    pub json_output: PathBuf,

    /// Converter executable (or script, when an interpreter is used)
    pub extractor_path: PathBuf,

    /// Interpreter for a script converter on Windows, e.g. "python" (None = run directly)
    pub extractor_interpreter: Option<String>,

    /// Kill the converter after this many seconds (None = wait forever)
    pub extractor_timeout_secs: Option<u64>,

    /// Path expression selecting drug entries, e.g. "drugbank.drug.*"
    pub record_path: String,

    /// Refresh the progress line every N records
    pub progress_interval: u64,
}

/// Spreadsheet enrichment settings
#[derive(Clone, Serialize, Deserialize)]
pub struct SpreadsheetConfig {
    pub base_url: String,
    pub spreadsheet_id: String,
    pub api_key: String,
    pub medications_range: String,
    pub drug_classes_range: String,
    pub indications_range: String,

    /// Request timeout in seconds (None = no timeout)
    pub timeout_secs: Option<u64>,
}

impl std::fmt::Debug for SpreadsheetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpreadsheetConfig")
            .field("base_url", &self.base_url)
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("api_key", &"<redacted>")
            .field("medications_range", &self.medications_range)
            .field("drug_classes_range", &self.drug_classes_range)
            .field("indications_range", &self.indications_range)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl IngestConfig {
    /// Load configuration from `.env` and the process environment
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            database: DatabaseConfig::from_env(),
            archive: ArchiveConfig::from_env(),
            spreadsheet: SpreadsheetConfig::from_env(),
            insert_chunk_size: env_parse("INSERT_CHUNK_SIZE").unwrap_or(DEFAULT_INSERT_CHUNK_SIZE),
        }
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.database.validate()?;
        self.archive.validate()?;
        self.spreadsheet.validate()?;

        if self.insert_chunk_size == 0 {
            return Err(config_error("INSERT_CHUNK_SIZE must be greater than 0"));
        }
        if self.insert_chunk_size > MAX_INSERT_CHUNK_SIZE {
            return Err(IngestError::Config(format!(
                "INSERT_CHUNK_SIZE cannot exceed {}",
                MAX_INSERT_CHUNK_SIZE
            )));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            url: env_or("DATABASE_URL", DEFAULT_DATABASE_URL),
            max_connections: env_parse("DATABASE_MAX_CONNECTIONS")
                .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(config_error("DATABASE_URL cannot be empty"));
        }
        if self.max_connections == 0 {
            return Err(config_error("DATABASE_MAX_CONNECTIONS must be greater than 0"));
        }
        Ok(())
    }
}

impl ArchiveConfig {
    pub fn from_env() -> Self {
        Self {
            zip_path: PathBuf::from(env_or("DRUGBANK_ZIP", "")),
            xml_entry: env_or("DRUGBANK_XML", ""),
            json_output: std::env::var("DRUGBANK_JSON_OUTPUT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| std::env::temp_dir().join(DEFAULT_JSON_FILE_NAME)),
            extractor_path: PathBuf::from(env_or("EXTRACTOR_PATH", DEFAULT_EXTRACTOR_PATH)),
            extractor_interpreter: std::env::var("EXTRACTOR_INTERPRETER")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            extractor_timeout_secs: env_parse("EXTRACTOR_TIMEOUT_SECS"),
            record_path: env_or("ARCHIVE_RECORD_PATH", DEFAULT_RECORD_PATH),
            progress_interval: env_parse("PARSE_PROGRESS_INTERVAL")
                .unwrap_or(DEFAULT_PROGRESS_INTERVAL),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.zip_path.as_os_str().is_empty() {
            return Err(config_error("DRUGBANK_ZIP must be set"));
        }
        if self.xml_entry.is_empty() {
            return Err(config_error("DRUGBANK_XML must be set"));
        }
        if self.json_output.as_os_str().is_empty() {
            return Err(config_error("DRUGBANK_JSON_OUTPUT cannot be empty"));
        }
        if self.extractor_path.as_os_str().is_empty() {
            return Err(config_error("EXTRACTOR_PATH cannot be empty"));
        }
        if self.progress_interval == 0 {
            return Err(config_error("PARSE_PROGRESS_INTERVAL must be greater than 0"));
        }
        if self.extractor_timeout_secs == Some(0) {
            return Err(config_error("EXTRACTOR_TIMEOUT_SECS must be greater than 0"));
        }
        Ok(())
    }

    pub fn extractor_timeout(&self) -> Option<Duration> {
        self.extractor_timeout_secs.map(Duration::from_secs)
    }

    /// How to launch the configured converter
    pub fn extractor_command(&self) -> ExtractorCommand {
        ExtractorCommand::for_host(&self.extractor_path, self.extractor_interpreter.as_deref())
    }
}

impl SpreadsheetConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_or("GOOGLESHEET_BASE_URL", DEFAULT_SHEETS_BASE_URL),
            spreadsheet_id: env_or("GOOGLESHEET_ID", ""),
            api_key: env_or("GOOGLESHEET_APIKEY", ""),
            medications_range: env_or("GOOGLESHEET_RANGE_MEDICATIONS", ""),
            drug_classes_range: env_or("GOOGLESHEET_RANGE_DRUGCLASSES", ""),
            indications_range: env_or("GOOGLESHEET_RANGE_INDICATIONS", ""),
            timeout_secs: env_parse("GOOGLESHEET_TIMEOUT_SECS"),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("GOOGLESHEET_BASE_URL", &self.base_url),
            ("GOOGLESHEET_ID", &self.spreadsheet_id),
            ("GOOGLESHEET_APIKEY", &self.api_key),
            ("GOOGLESHEET_RANGE_MEDICATIONS", &self.medications_range),
            ("GOOGLESHEET_RANGE_DRUGCLASSES", &self.drug_classes_range),
            ("GOOGLESHEET_RANGE_INDICATIONS", &self.indications_range),
        ];

        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(config_error(&format!("{} must be set", name)));
            }
        }

        if self.timeout_secs == Some(0) {
            return Err(config_error("GOOGLESHEET_TIMEOUT_SECS must be greater than 0"));
        }

        Ok(())
    }

    /// The three ranges in request order: names, drug classes, indications
    pub fn ranges(&self) -> [&str; 3] {
        [
            &self.medications_range,
            &self.drug_classes_range,
            &self.indications_range,
        ]
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn config_error(message: &str) -> IngestError {
    IngestError::Config(message.to_string())
}
