use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::audit::{AuditEvent, AuditLog};
use crate::normalize::{normalize, strip_version_prefix};
use crate::table::Table;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    Unvalidated,
    LargerTieBreak,
    NonNumericTieBreak,
    LaterRow,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::Unvalidated => write!(f, "unvalidated"),
            DropReason::LargerTieBreak => write!(f, "larger_tie_break"),
            DropReason::NonNumericTieBreak => write!(f, "non_numeric_tie_break"),
            DropReason::LaterRow => write!(f, "later_row"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DropRecord {
    pub group_key: String,
    pub dropped_row: usize,
    pub dropped_tie_break: Option<String>,
    pub kept_row: usize,
    pub reason: DropReason,
}

#[derive(Debug, Clone)]
pub struct DedupOutcome {
    pub table: Table,
    pub dropped: Vec<DropRecord>,
}

/// Collapses rows sharing a normalized `group_key` to a single verbatim row.
///
/// Within a group, rows with any non-null `validation_columns` value are
/// preferred; among those the smallest numeric `tie_break_key` wins, and
/// without any numeric value the first row in table order wins. Rows with a
/// blank group key are never grouped. Survivors keep their relative order.
pub fn dedupe(
    table: &Table,
    group_key: &str,
    tie_break_key: &str,
    validation_columns: &[String],
    audit: &mut AuditLog,
) -> DedupOutcome {
    let Some(group_values) = table.column_values(group_key) else {
        tracing::warn!(%group_key, "group key column missing; deduplication skipped");
        return DedupOutcome {
            table: table.clone(),
            dropped: Vec::new(),
        };
    };
    if !table.has_column(tie_break_key) {
        tracing::warn!(%tie_break_key, "tie-break column missing; first row of each group wins");
    }
    let validation: Vec<usize> = validation_columns
        .iter()
        .filter_map(|column| table.column_index(column))
        .collect();

    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    let mut kept: Vec<usize> = Vec::new();
    for (row, value) in group_values.into_iter().enumerate() {
        let key = value.map(normalize).unwrap_or_default();
        if key.is_empty() {
            kept.push(row);
            continue;
        }
        let members = groups.entry(key.clone()).or_default();
        if members.is_empty() {
            order.push(key);
        }
        members.push(row);
    }

    let mut dropped = Vec::new();
    for key in &order {
        let members = &groups[key];
        if members.len() == 1 {
            kept.push(members[0]);
            continue;
        }
        let validated: Vec<usize> = members
            .iter()
            .copied()
            .filter(|&row| validation.iter().any(|&col| table.rows()[row][col].is_some()))
            .collect();
        let candidates = if validated.is_empty() {
            members.clone()
        } else {
            validated
        };
        let numeric = |row: usize| table.value(row, tie_break_key).and_then(strip_version_prefix);
        let by_number = candidates
            .iter()
            .filter_map(|&row| numeric(row).map(|n| (n, row)))
            .min();
        let winner = by_number.map(|(_, row)| row).unwrap_or(candidates[0]);
        kept.push(winner);

        for &row in members {
            if row == winner {
                continue;
            }
            let reason = if !candidates.contains(&row) {
                DropReason::Unvalidated
            } else if by_number.is_none() {
                DropReason::LaterRow
            } else if numeric(row).is_some() {
                DropReason::LargerTieBreak
            } else {
                DropReason::NonNumericTieBreak
            };
            let record = DropRecord {
                group_key: key.clone(),
                dropped_row: row,
                dropped_tie_break: table.value(row, tie_break_key).map(str::to_string),
                kept_row: winner,
                reason,
            };
            audit.push(AuditEvent::DedupDrop {
                group_key: record.group_key.clone(),
                dropped_row: record.dropped_row,
                dropped_tie_break: record.dropped_tie_break.clone(),
                kept_row: record.kept_row,
                reason: reason.to_string(),
            });
            dropped.push(record);
        }
    }

    kept.sort_unstable();
    tracing::info!(
        groups = order.len(),
        kept = kept.len(),
        dropped = dropped.len(),
        "deduplicated"
    );
    DedupOutcome {
        table: table.select_rows(&kept),
        dropped,
    }
}
