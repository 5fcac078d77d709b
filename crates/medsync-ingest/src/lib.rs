//! Medsync Ingest Library
//!
//! Rebuilds the medication dataset from a DrugBank export.
//!
//! # Stages
//!
//! - **Extract**: run the archive converter to turn the zipped XML into JSON ([`extractor`])
//! - **Parse**: stream drug entries out of the JSON document ([`parser`])
//! - **Enrich**: fetch drug classes and indications from a Google Sheet ([`enrichment`])
//! - **Merge & load**: map, enrich and replace the stored dataset in one transaction
//!   ([`merge`], [`storage`])
//!
//! [`pipeline::IngestPipeline`] runs them in order.
//!
//! # Example
//!
//! ```no_run
//! use medsync_ingest::config::IngestConfig;
//! use medsync_ingest::pipeline::IngestPipeline;
//! use medsync_ingest::storage::PgMedicationStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = IngestConfig::from_env();
//!     config.validate()?;
//!
//!     let store = PgMedicationStore::connect(&config.database).await?;
//!     let mut pipeline = IngestPipeline::from_config(&config, Arc::new(store))?;
//!     let stats = pipeline.run().await?;
//!     println!("saved {} medications", stats.persisted);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod convert;
pub mod enrichment;
pub mod error;
pub mod extractor;
pub mod merge;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod queries;
pub mod storage;

pub use error::{ErrorKind, IngestError, Result};
pub use pipeline::{IngestPipeline, PipelineState, PipelineStats};
