//! Mapping archive entries to medications and applying enrichment

use crate::enrichment::EnrichmentLookup;
use crate::models::{MedicationRecord, RawDrugRecord};
use tracing::debug;

/// Result of merging one run's records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Medications in archive order
    pub medications: Vec<MedicationRecord>,

    /// Entries dropped for lacking a usable name
    pub rejected: usize,

    /// Medications whose classification came from the spreadsheet
    pub enriched: usize,
}

/// Map every record and overwrite classification fields from `lookup`
///
/// Records without a matching lookup entry keep their archive-derived values.
pub fn merge_records(records: &[RawDrugRecord], lookup: &EnrichmentLookup) -> MergeOutcome {
    let mut outcome = MergeOutcome {
        medications: Vec::with_capacity(records.len()),
        ..Default::default()
    };

    for (index, record) in records.iter().enumerate() {
        let Some(mut medication) = MedicationRecord::from_drug(record) else {
            debug!(index, "Skipping drug entry without a name");
            outcome.rejected += 1;
            continue;
        };

        if let Some(entry) = lookup.get(&medication.name) {
            medication.apply_enrichment(entry);
            outcome.enriched += 1;
        }

        outcome.medications.push(medication);
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EnrichmentEntry;
    use serde_json::json;

    fn record(value: serde_json::Value) -> RawDrugRecord {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_enrichment_scenario() {
        let records = vec![
            record(json!({"name": "Aspirin"})),
            record(json!({"name": "Ibuprofen"})),
        ];
        let lookup: EnrichmentLookup = [(
            "aspirin",
            EnrichmentEntry {
                drug_class: Some("NSAID".to_string()),
                indication: Some("Pain relief".to_string()),
            },
        )]
        .into_iter()
        .collect();

        let outcome = merge_records(&records, &lookup);

        assert_eq!(outcome.enriched, 1);
        assert_eq!(outcome.rejected, 0);
        assert_eq!(outcome.medications.len(), 2);
        assert_eq!(outcome.medications[0].name, "Aspirin");
        assert_eq!(outcome.medications[0].drug_class.as_deref(), Some("NSAID"));
        assert_eq!(outcome.medications[0].indication.as_deref(), Some("Pain relief"));
        assert_eq!(outcome.medications[1].name, "Ibuprofen");
        assert_eq!(outcome.medications[1].drug_class, None);
        assert_eq!(outcome.medications[1].indication, None);
    }

    #[test]
    fn test_unmatched_records_keep_archive_values() {
        let records = vec![record(json!({
            "name": "Naproxen",
            "indication": "Rheumatoid arthritis",
            "classification": {"direct-parent": "Naphthalenes"}
        }))];

        let outcome = merge_records(&records, &EnrichmentLookup::default());
        assert_eq!(outcome.enriched, 0);
        assert_eq!(
            outcome.medications[0].indication.as_deref(),
            Some("Rheumatoid arthritis")
        );
        assert_eq!(outcome.medications[0].drug_class.as_deref(), Some("Naphthalenes"));
    }

    #[test]
    fn test_nameless_records_are_rejected_in_order() {
        let records = vec![
            record(json!({"name": "B"})),
            record(json!({"description": "no name"})),
            record(json!({"name": "A"})),
        ];

        let outcome = merge_records(&records, &EnrichmentLookup::default());
        assert_eq!(outcome.rejected, 1);
        let names: Vec<_> = outcome.medications.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["B", "A"]);
    }
}
