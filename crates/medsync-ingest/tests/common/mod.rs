//! Shared test doubles for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use medsync_ingest::enrichment::{EnrichmentSource, SpreadsheetColumns};
use medsync_ingest::error::{IngestError, Result};
use medsync_ingest::models::MedicationRecord;
use medsync_ingest::progress::ProgressReporter;
use medsync_ingest::storage::{MedicationStore, ReplaceSession};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Store
// ============================================================================

/// Store keeping committed rows in memory
///
/// A session works on a copy of the committed rows; only `commit` writes it back.
#[derive(Clone, Default)]
pub struct MemoryStore {
    committed: Arc<Mutex<Vec<MedicationRecord>>>,
    fail_inserts: bool,
}

impl MemoryStore {
    pub fn with_rows(rows: Vec<MedicationRecord>) -> Self {
        Self {
            committed: Arc::new(Mutex::new(rows)),
            fail_inserts: false,
        }
    }

    pub fn failing_inserts(mut self) -> Self {
        self.fail_inserts = true;
        self
    }

    pub fn rows(&self) -> Vec<MedicationRecord> {
        self.committed.lock().unwrap().clone()
    }
}

#[async_trait]
impl MedicationStore for MemoryStore {
    async fn begin_replace(&self) -> Result<Box<dyn ReplaceSession>> {
        Ok(Box::new(MemorySession {
            working: self.rows(),
            committed: Arc::clone(&self.committed),
            fail_inserts: self.fail_inserts,
        }))
    }
}

struct MemorySession {
    working: Vec<MedicationRecord>,
    committed: Arc<Mutex<Vec<MedicationRecord>>>,
    fail_inserts: bool,
}

#[async_trait]
impl ReplaceSession for MemorySession {
    async fn clear(&mut self) -> Result<u64> {
        let removed = self.working.len() as u64;
        self.working.clear();
        Ok(removed)
    }

    async fn insert_all(&mut self, medications: &[MedicationRecord]) -> Result<usize> {
        if self.fail_inserts {
            return Err(IngestError::Database(sqlx::Error::PoolClosed));
        }
        self.working.extend_from_slice(medications);
        Ok(medications.len())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        *self.committed.lock().unwrap() = self.working;
        Ok(())
    }
}

// ============================================================================
// Enrichment
// ============================================================================

/// Enrichment source returning canned columns or a canned failure
pub struct StubEnrichment {
    columns: Option<SpreadsheetColumns>,
    calls: AtomicUsize,
}

impl StubEnrichment {
    pub fn returning(columns: SpreadsheetColumns) -> Arc<Self> {
        Arc::new(Self {
            columns: Some(columns),
            calls: AtomicUsize::new(0),
        })
    }

    /// Fails like a rejected API key
    pub fn unauthorized() -> Arc<Self> {
        Arc::new(Self {
            columns: None,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EnrichmentSource for StubEnrichment {
    async fn fetch_columns(&self) -> Result<SpreadsheetColumns> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.columns.clone().ok_or(IngestError::EnrichmentStatus {
            status: 403,
            message: "The caller does not have permission".to_string(),
        })
    }
}

pub fn columns(rows: &[(&str, Option<&str>, Option<&str>)]) -> SpreadsheetColumns {
    SpreadsheetColumns {
        names: rows.iter().map(|(n, _, _)| Some(n.to_string())).collect(),
        drug_classes: rows.iter().map(|(_, c, _)| c.map(str::to_string)).collect(),
        indications: rows.iter().map(|(_, _, i)| i.map(str::to_string)).collect(),
    }
}

// ============================================================================
// Progress
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Start,
    Update(u64),
    Clear,
}

/// Reporter recording every call
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgress {
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<u64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Update(n) => Some(n),
                _ => None,
            })
            .collect()
    }
}

impl ProgressReporter for RecordingProgress {
    fn start(&self, _message: &str) {
        self.events.lock().unwrap().push(ProgressEvent::Start);
    }

    fn update(&self, count: u64) {
        self.events.lock().unwrap().push(ProgressEvent::Update(count));
    }

    fn clear(&self) {
        self.events.lock().unwrap().push(ProgressEvent::Clear);
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn medication(name: &str) -> MedicationRecord {
    MedicationRecord {
        drugbank_id: None,
        name: name.to_string(),
        description: None,
        synonyms: Vec::new(),
        drug_class: None,
        indication: None,
    }
}

/// A converted document holding one drug entry per name
pub fn drugbank_json(names: &[&str]) -> String {
    let drugs: Vec<serde_json::Value> = names
        .iter()
        .map(|name| serde_json::json!({"@type": "small molecule", "name": name}))
        .collect();
    serde_json::json!({"drugbank": {"@version": "5.1", "drug": drugs}}).to_string()
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
