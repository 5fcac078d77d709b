//! Medsync - medication dataset ingestion tool

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use medsync_common::logging::{init_logging, LogConfig};
use medsync_ingest::config::{ArchiveConfig, IngestConfig};
use medsync_ingest::enrichment::EnrichmentLookup;
use medsync_ingest::extractor::{ArchiveExtractor, ExtractionRequest};
use medsync_ingest::merge::merge_records;
use medsync_ingest::parser::{RecordPath, StreamingParser};
use medsync_ingest::pipeline::IngestPipeline;
use medsync_ingest::progress;
use medsync_ingest::queries::{self, FindQuery, SortField, SortOrder, DEFAULT_LIMIT};
use medsync_ingest::storage::PgMedicationStore;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "medsync")]
#[command(author, version, about = "Medication dataset ingestion tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replace the stored medications with a fresh import
    Run {
        #[command(flatten)]
        archive: ArchiveArgs,

        /// Apply pending migrations first
        #[arg(long)]
        migrate: bool,
    },

    /// Only convert the archive to JSON
    Extract {
        #[command(flatten)]
        archive: ArchiveArgs,
    },

    /// Parse a converted JSON document and report what an import would store
    Parse {
        /// JSON document (defaults to DRUGBANK_JSON_OUTPUT)
        path: Option<PathBuf>,
    },

    /// Apply database migrations
    Migrate,

    /// List stored medications
    List {
        /// Case-insensitive substring of the name
        #[arg(short, long)]
        search: Option<String>,

        #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
        limit: i64,

        #[arg(short, long, default_value_t = 0)]
        offset: i64,

        #[arg(long, value_enum, default_value_t = SortField::Name)]
        sort_by: SortField,

        #[arg(long, value_enum, default_value_t = SortOrder::Asc)]
        order: SortOrder,
    },

    /// Show one medication
    Show {
        id: i64,
    },

    /// Search names, synonyms, drug classes and indications
    Search {
        query: String,
    },
}

/// Overrides for the archive locations in the environment
#[derive(Args, Debug, Default)]
struct ArchiveArgs {
    /// ZIP archive containing the DrugBank XML
    #[arg(long)]
    archive: Option<PathBuf>,

    /// XML entry inside the archive
    #[arg(long)]
    entry: Option<String>,

    /// Where to write the converted JSON
    #[arg(long)]
    output: Option<PathBuf>,
}

impl ArchiveArgs {
    fn apply(self, archive: &mut ArchiveConfig) {
        if let Some(path) = self.archive {
            archive.zip_path = path;
        }
        if let Some(entry) = self.entry {
            archive.xml_entry = entry;
        }
        if let Some(output) = self.output {
            archive.json_output = output;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .log_file_prefix("medsync")
        .filter_directives("sqlx=warn")
        .build()
        .merge_env()?
        .with_verbose(cli.verbose);

    let _guard = init_logging(&log_config)?;

    let mut config = IngestConfig::from_env();

    match cli.command {
        Command::Run { archive, migrate } => {
            archive.apply(&mut config.archive);
            config.validate()?;

            let store = connect(&config).await?;
            if migrate {
                store.migrate().await?;
            }

            let mut pipeline = IngestPipeline::from_config(&config, Arc::new(store))?
                .with_progress(progress::for_stderr());
            pipeline.run().await?;
        },
        Command::Extract { archive } => {
            archive.apply(&mut config.archive);
            config.archive.validate()?;

            let settings = &config.archive;
            let extractor = ArchiveExtractor::new(settings.extractor_command())
                .with_timeout(settings.extractor_timeout());
            let request = ExtractionRequest::new(
                &settings.zip_path,
                &settings.xml_entry,
                &settings.json_output,
            )?;

            let output = extractor.extract(&request).await?;
            info!("JSON written to {}", output.display());
        },
        Command::Parse { path } => {
            let path = path.unwrap_or_else(|| config.archive.json_output.clone());
            let parser = StreamingParser::new(config.archive.record_path.parse::<RecordPath>()?)
                .with_progress_interval(config.archive.progress_interval);

            let reporter = progress::for_stderr();
            let records = parser.collect(&path, reporter.as_ref()).await?;
            let outcome = merge_records(&records, &EnrichmentLookup::default());

            info!(
                parsed = records.len(),
                importable = outcome.medications.len(),
                rejected = outcome.rejected,
                "Parsed {}",
                path.display()
            );
        },
        Command::Migrate => {
            let store = connect(&config).await?;
            store.migrate().await?;
        },
        Command::List {
            search,
            limit,
            offset,
            sort_by,
            order,
        } => {
            let store = connect(&config).await?;
            let query = FindQuery {
                limit,
                offset,
                search,
                sort_by,
                order,
            };
            let page = queries::list(store.pool(), &query).await?;
            print_json(&page)?;
        },
        Command::Show { id } => {
            let store = connect(&config).await?;
            let medication = queries::get_details(store.pool(), id).await?;
            print_json(&medication)?;
        },
        Command::Search { query } => {
            let store = connect(&config).await?;
            let medications = queries::find_matching(store.pool(), &query).await?;
            print_json(&medications)?;
        },
    }

    Ok(())
}

async fn connect(config: &IngestConfig) -> Result<PgMedicationStore> {
    let store = PgMedicationStore::connect(&config.database)
        .await
        .context("Failed to connect to the database")?;
    Ok(store.with_chunk_size(config.insert_chunk_size))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
