//! Medication ingestion pipeline
//!
//! Runs the stages in strict order: clear, extract, parse, enrich, merge.
//! The clear happens inside the replace session opened at the start, and the
//! session is only committed after the last insert. Any failure on the way
//! drops the session, so the stored dataset is either fully replaced or left
//! exactly as it was.

use crate::config::IngestConfig;
use crate::enrichment::{EnrichmentSource, SheetsClient};
use crate::error::{IngestError, Result};
use crate::extractor::{ArchiveExtractor, ExtractionRequest};
use crate::merge::merge_records;
use crate::parser::{RecordPath, StreamingParser};
use crate::progress::{NoopProgress, ProgressReporter};
use crate::storage::MedicationStore;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Where a pipeline run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Clearing,
    Extracting,
    Parsing,
    Enriching,
    Merging,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    /// Whether `self -> next` is a legal step
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, next),
            (Idle, Clearing)
                | (Clearing, Extracting)
                | (Extracting, Parsing)
                | (Parsing, Enriching)
                | (Enriching, Merging)
                | (Merging, Done)
        ) || (next == Failed && !matches!(self, Idle | Done | Failed))
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Clearing => "clearing",
            PipelineState::Extracting => "extracting",
            PipelineState::Parsing => "parsing",
            PipelineState::Enriching => "enriching",
            PipelineState::Merging => "merging",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Summary of a successful run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Entries read from the converted document
    pub parsed: usize,
    /// Medications written
    pub persisted: usize,
    /// Entries dropped for lacking a name
    pub rejected: usize,
    /// Medications updated from the spreadsheet
    pub enriched: usize,
    /// Rows removed from the previous dataset
    pub cleared: u64,
    pub elapsed: Duration,
}

/// One full-replace ingestion run
pub struct IngestPipeline {
    extractor: ArchiveExtractor,
    parser: StreamingParser,
    enrichment: Arc<dyn EnrichmentSource>,
    store: Arc<dyn MedicationStore>,
    progress: Arc<dyn ProgressReporter>,
    request: ExtractionRequest,
    state: PipelineState,
    transitions: Vec<PipelineState>,
}

impl IngestPipeline {
    pub fn new(
        extractor: ArchiveExtractor,
        parser: StreamingParser,
        enrichment: Arc<dyn EnrichmentSource>,
        store: Arc<dyn MedicationStore>,
        request: ExtractionRequest,
    ) -> Self {
        Self {
            extractor,
            parser,
            enrichment,
            store,
            progress: Arc::new(NoopProgress),
            request,
            state: PipelineState::Idle,
            transitions: vec![PipelineState::Idle],
        }
    }

    /// Build every stage from configuration
    pub fn from_config(config: &IngestConfig, store: Arc<dyn MedicationStore>) -> Result<Self> {
        config.archive.validate()?;

        let archive = &config.archive;
        let extractor = ArchiveExtractor::new(archive.extractor_command())
            .with_timeout(archive.extractor_timeout());

        let parser = StreamingParser::new(archive.record_path.parse::<RecordPath>()?)
            .with_progress_interval(archive.progress_interval);

        let request =
            ExtractionRequest::new(&archive.zip_path, &archive.xml_entry, &archive.json_output)?;

        let enrichment = Arc::new(SheetsClient::new(config.spreadsheet.clone())?);

        Ok(Self::new(extractor, parser, enrichment, store, request))
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressReporter>) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Every state the pipeline has been in, starting with `Idle`
    pub fn transitions(&self) -> &[PipelineState] {
        &self.transitions
    }

    /// Run every stage once
    pub async fn run(&mut self) -> Result<PipelineStats> {
        if self.state != PipelineState::Idle {
            return Err(IngestError::Config(format!(
                "pipeline cannot start from state '{}'",
                self.state
            )));
        }

        let started = Instant::now();

        match self.execute().await {
            Ok(mut stats) => {
                stats.elapsed = started.elapsed();
                self.transition(PipelineState::Done);
                info!(
                    parsed = stats.parsed,
                    rejected = stats.rejected,
                    enriched = stats.enriched,
                    cleared = stats.cleared,
                    elapsed_ms = stats.elapsed.as_millis() as u64,
                    "Successfully saved {} medications!",
                    stats.persisted
                );
                Ok(stats)
            },
            Err(err) => {
                let failed_in = self.state;
                self.transition(PipelineState::Failed);
                error!(stage = %failed_in, kind = ?err.kind(), "Medication import failed: {}", err);
                Err(err)
            },
        }
    }

    async fn execute(&mut self) -> Result<PipelineStats> {
        self.transition(PipelineState::Clearing);
        info!("Step 1/5: Clearing medication data ...");
        let mut session = self.store.begin_replace().await?;
        let cleared = session.clear().await?;
        debug!(cleared, "Existing medications removed, pending commit");

        self.transition(PipelineState::Extracting);
        info!("Step 2/5: Extracting JSON from archive ...");
        let json_path = self.extractor.extract(&self.request).await?;

        self.transition(PipelineState::Parsing);
        info!("Step 3/5: Extracting medications from JSON ...");
        let records = self
            .parser
            .collect(&json_path, self.progress.as_ref())
            .await?;
        info!(records = records.len(), "Parsed drug entries");

        self.transition(PipelineState::Enriching);
        info!("Step 4/5: Fetching additional medication data from Google Sheet ...");
        let lookup = self.enrichment.fetch_columns().await?.into_lookup();
        info!(entries = lookup.len(), "Built enrichment lookup");

        self.transition(PipelineState::Merging);
        info!("Step 5/5: Writing to database ...");
        let outcome = merge_records(&records, &lookup);
        let persisted = session.insert_all(&outcome.medications).await?;
        session.commit().await?;

        Ok(PipelineStats {
            parsed: records.len(),
            persisted,
            rejected: outcome.rejected,
            enriched: outcome.enriched,
            cleared,
            elapsed: Duration::ZERO,
        })
    }

    fn transition(&mut self, next: PipelineState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "illegal transition {} -> {}",
            self.state,
            next
        );
        debug!(from = %self.state, to = %next, "Pipeline transition");
        self.state = next;
        self.transitions.push(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use PipelineState::*;

    #[test]
    fn test_forward_transitions() {
        let order = [Idle, Clearing, Extracting, Parsing, Enriching, Merging, Done];
        for pair in order.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(!Idle.can_transition_to(Parsing));
        assert!(!Merging.can_transition_to(Clearing));
    }

    #[test]
    fn test_failed_reachable_from_active_states() {
        for state in [Clearing, Extracting, Parsing, Enriching, Merging] {
            assert!(state.can_transition_to(Failed));
        }
        for state in [Idle, Done, Failed] {
            assert!(!state.can_transition_to(Failed));
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(Done.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Merging.is_terminal());
    }
}
