//! Medication data models
//!
//! - [`RawDrugRecord`]: one archive entry exactly as the converter wrote it
//! - [`MedicationRecord`]: the shape written to the `medications` table
//! - [`Medication`]: a stored row, as returned by the read-side queries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key under which the converter stores element text next to attributes
pub const TEXT_KEY: &str = "#text";

/// Attribute marking the preferred DrugBank identifier
const PRIMARY_ATTRIBUTE: &str = "@primary";

/// A drug entry from the converted archive
///
/// Field values keep whatever shape the XML conversion produced: plain strings,
/// objects carrying attributes, or arrays for repeated elements.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawDrugRecord(Map<String, Value>);

impl RawDrugRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Follow nested object keys, e.g. `["classification", "direct-parent"]`
    pub fn get_path(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.0.get(*first)?, |value, key| value.get(*key))
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for RawDrugRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Supplementary classification for one medication name
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EnrichmentEntry {
    pub drug_class: Option<String>,
    pub indication: Option<String>,
}

/// A medication ready to be persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MedicationRecord {
    pub drugbank_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub synonyms: Vec<String>,
    pub drug_class: Option<String>,
    pub indication: Option<String>,
}

impl MedicationRecord {
    /// Map an archive entry to the persisted shape
    ///
    /// Returns `None` when the entry has no usable name.
    pub fn from_drug(drug: &RawDrugRecord) -> Option<Self> {
        let name = drug.get("name").and_then(text_value)?;

        Some(Self {
            drugbank_id: drug.get("drugbank-id").and_then(primary_id),
            name,
            description: drug.get("description").and_then(text_value),
            synonyms: drug
                .get_path(&["synonyms", "synonym"])
                .map(text_values)
                .unwrap_or_default(),
            drug_class: drug
                .get_path(&["classification", "direct-parent"])
                .and_then(text_value),
            indication: drug.get("indication").and_then(text_value),
        })
    }

    /// Overwrite classification fields with a spreadsheet entry
    ///
    /// Both fields are replaced, so a blank value in the entry clears the
    /// archive-derived one.
    pub fn apply_enrichment(&mut self, entry: &EnrichmentEntry) {
        self.drug_class = entry.drug_class.as_deref().and_then(non_blank);
        self.indication = entry.indication.as_deref().and_then(non_blank);
    }
}

/// A stored medication row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Medication {
    pub id: i64,
    pub drugbank_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub synonyms: Vec<String>,
    pub drug_class: Option<String>,
    pub indication: Option<String>,
    pub imported_at: DateTime<Utc>,
}

/// Extract trimmed text from a converted XML value
///
/// Strings and numbers are used directly, objects contribute their `#text`,
/// arrays their first textual element. Blank text counts as absent.
pub fn text_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => non_blank(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(map) => map.get(TEXT_KEY).and_then(text_value),
        Value::Array(items) => items.iter().find_map(text_value),
        Value::Null | Value::Bool(_) => None,
    }
}

/// Text of every element of a repeated field, in order
fn text_values(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(text_value).collect(),
        other => text_value(other).into_iter().collect(),
    }
}

/// The `primary="true"` identifier, falling back to the first one
fn primary_id(value: &Value) -> Option<String> {
    let is_primary = |v: &Value| {
        v.get(PRIMARY_ATTRIBUTE)
            .and_then(Value::as_str)
            .is_some_and(|p| p.eq_ignore_ascii_case("true"))
    };

    match value {
        Value::Array(items) => items
            .iter()
            .find(|v| is_primary(*v))
            .and_then(text_value)
            .or_else(|| items.iter().find_map(text_value)),
        other => text_value(other),
    }
}

pub(crate) fn non_blank(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
