//! Spreadsheet enrichment source
//!
//! Drug classes and indications curated outside of DrugBank live in a Google
//! Sheet as three row-aligned columns. [`SheetsClient`] fetches them in a single
//! `values:batchGet` call and [`SpreadsheetColumns::into_lookup`] turns them into
//! a case-insensitive [`EnrichmentLookup`].

use crate::config::SpreadsheetConfig;
use crate::error::{IngestError, Result};
use crate::models::{non_blank, EnrichmentEntry};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

/// A remote source of the three enrichment columns
#[async_trait]
pub trait EnrichmentSource: Send + Sync {
    /// Fetch names, drug classes and indications, row-aligned
    async fn fetch_columns(&self) -> Result<SpreadsheetColumns>;
}

/// Three parallel columns, one value per row
///
/// Columns may have different lengths: trailing empty rows are simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpreadsheetColumns {
    pub names: Vec<Option<String>>,
    pub drug_classes: Vec<Option<String>>,
    pub indications: Vec<Option<String>>,
}

impl SpreadsheetColumns {
    /// Build the name lookup
    ///
    /// Rows without a name, or with neither a drug class nor an indication, are
    /// skipped. A name repeated further down the sheet replaces the earlier row.
    pub fn into_lookup(self) -> EnrichmentLookup {
        let mut entries = HashMap::with_capacity(self.names.len());

        for (row, name) in self.names.into_iter().enumerate() {
            let Some(name) = name.as_deref().and_then(non_blank) else {
                continue;
            };
            let drug_class = cell(&self.drug_classes, row);
            let indication = cell(&self.indications, row);

            if drug_class.is_none() && indication.is_none() {
                continue;
            }

            entries.insert(
                lookup_key(&name),
                EnrichmentEntry {
                    drug_class,
                    indication,
                },
            );
        }

        EnrichmentLookup(entries)
    }
}

fn cell(column: &[Option<String>], row: usize) -> Option<String> {
    column.get(row)?.as_deref().and_then(non_blank)
}

fn lookup_key(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Enrichment entries keyed by lower-cased medication name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentLookup(HashMap<String, EnrichmentEntry>);

impl EnrichmentLookup {
    pub fn get(&self, name: &str) -> Option<&EnrichmentEntry> {
        self.0.get(&lookup_key(name))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: AsRef<str>> FromIterator<(S, EnrichmentEntry)> for EnrichmentLookup {
    fn from_iter<I: IntoIterator<Item = (S, EnrichmentEntry)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(name, entry)| (lookup_key(name.as_ref()), entry))
                .collect(),
        )
    }
}

// ============================================================================
// Google Sheets
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    value_ranges: Vec<ValueRange>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    range: Option<String>,
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

impl ValueRange {
    /// First cell of every row
    fn first_column(self) -> Vec<Option<String>> {
        self.values
            .into_iter()
            .map(|row| row.into_iter().next().and_then(cell_text))
            .collect()
    }
}

fn cell_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// Google Sheets API v4 client
pub struct SheetsClient {
    client: Client,
    config: SpreadsheetConfig,
}

impl SheetsClient {
    pub fn new(config: SpreadsheetConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = Client::builder().user_agent(concat!(
            "medsync-ingest/",
            env!("CARGO_PKG_VERSION")
        ));
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        Ok(Self {
            client: builder.build()?,
            config,
        })
    }

    fn batch_get_url(&self) -> String {
        format!(
            "{}/spreadsheets/{}/values:batchGet",
            self.config.base_url.trim_end_matches('/'),
            self.config.spreadsheet_id
        )
    }
}

#[async_trait]
impl EnrichmentSource for SheetsClient {
    async fn fetch_columns(&self) -> Result<SpreadsheetColumns> {
        let ranges = self.config.ranges();
        let mut query: Vec<(&str, &str)> = ranges.iter().map(|r| ("ranges", *r)).collect();
        query.push(("majorDimension", "ROWS"));
        query.push(("key", self.config.api_key.as_str()));

        debug!(spreadsheet = %self.config.spreadsheet_id, ?ranges, "Requesting spreadsheet ranges");

        let response = self
            .client
            .get(self.batch_get_url())
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|b| b.error.message)
                .unwrap_or_else(|_| {
                    status
                        .canonical_reason()
                        .unwrap_or("request failed")
                        .to_string()
                });
            return Err(IngestError::EnrichmentStatus {
                status: status.as_u16(),
                message,
            });
        }

        let body: BatchGetResponse = response.json().await?;
        if body.value_ranges.len() != ranges.len() {
            return Err(IngestError::EnrichmentResponse(format!(
                "expected {} value ranges, got {}",
                ranges.len(),
                body.value_ranges.len()
            )));
        }

        let mut columns = body.value_ranges.into_iter().map(|vr| {
            debug!(range = vr.range.as_deref().unwrap_or("?"), rows = vr.values.len(), "Received range");
            vr.first_column()
        });
        let names = columns.next().unwrap_or_default();
        let drug_classes = columns.next().unwrap_or_default();
        let indications = columns.next().unwrap_or_default();

        info!(
            names = names.len(),
            drug_classes = drug_classes.len(),
            indications = indications.len(),
            "Fetched spreadsheet columns"
        );

        Ok(SpreadsheetColumns {
            names,
            drug_classes,
            indications,
        })
    }
}
