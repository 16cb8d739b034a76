use std::collections::BTreeMap;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;
use crate::fs_util::write_bytes_atomic;
use crate::table::Table;

// No source suffix and no provenance entry.
pub const IDENTIFIER_COLUMNS: [&str; 3] = ["symbol", "primary_id", "xref_id"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceEntry {
    pub source: String,
    pub description: String,
    pub generated_timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceDocument {
    pub columns: BTreeMap<String, ProvenanceEntry>,
}

impl ProvenanceDocument {
    pub fn get(&self, column: &str) -> Option<&ProvenanceEntry> {
        self.columns.get(column)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn write(&self, path: &Utf8Path) -> Result<(), KiraError> {
        let content =
            serde_json::to_vec_pretty(self).map_err(|err| KiraError::Filesystem(err.to_string()))?;
        write_bytes_atomic(path, &content)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProvenanceTracker {
    entries: BTreeMap<String, ProvenanceEntry>,
}

impl ProvenanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, column: &str, source: &str, description: &str) {
        if self.entries.contains_key(column) {
            tracing::debug!(%column, %source, "provenance already recorded; keeping first entry");
            return;
        }
        self.entries.insert(
            column.to_string(),
            ProvenanceEntry {
                source: source.to_string(),
                description: description.to_string(),
                generated_timestamp: chrono::Utc::now().to_rfc3339(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn emit(&self) -> ProvenanceDocument {
        ProvenanceDocument {
            columns: self.entries.clone(),
        }
    }

    pub fn gaps(&self, table: &Table, identifier_columns: &[&str]) -> Vec<String> {
        let gaps: Vec<String> = table
            .columns()
            .iter()
            .filter(|column| !identifier_columns.contains(&column.as_str()))
            .filter(|column| !self.entries.contains_key(column.as_str()))
            .cloned()
            .collect();
        for column in &gaps {
            tracing::warn!(%column, "output column has no provenance entry");
        }
        gaps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_record_wins_and_emit_is_pure() {
        let mut tracker = ProvenanceTracker::new();
        tracker.record("group_manning", "manning", "kinase group");
        tracker.record("group_manning", "other", "ignored");
        let first = tracker.emit();
        let second = tracker.emit();
        assert_eq!(first, second);
        assert_eq!(first.get("group_manning").unwrap().source, "manning");
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn gaps_skip_identifier_columns() {
        let mut table = Table::with_rows(1);
        for column in ["symbol", "group_a", "group_b"] {
            table.set_column(column, vec![None]).unwrap();
        }
        let mut tracker = ProvenanceTracker::new();
        tracker.record("group_a", "a", "group");
        assert_eq!(tracker.gaps(&table, &IDENTIFIER_COLUMNS), vec!["group_b"]);
    }
}
