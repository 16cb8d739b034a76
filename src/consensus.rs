use serde::Serialize;

use crate::audit::{AuditEvent, AuditLog};
use crate::merge::source_column;
use crate::normalize::normalize;
use crate::provenance::ProvenanceTracker;
use crate::table::Table;

pub fn match_column(attribute: &str, left: &str, right: &str) -> String {
    format!("{attribute}_match_{left}_{right}")
}

pub fn consensus_column(attribute: &str) -> String {
    format!("{attribute}_consensus")
}

pub fn support_column(attribute: &str) -> String {
    format!("{attribute}_support")
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsensusReport {
    pub attribute: String,
    pub sources: Vec<String>,
    pub resolved_rows: usize,
    pub agreements: usize,
    pub mismatches: usize,
}

#[derive(Debug, Clone)]
pub struct ConsensusOutcome {
    pub table: Table,
    pub report: ConsensusReport,
}

pub fn resolve_consensus(
    mut table: Table,
    attribute: &str,
    source_priority: &[String],
    provenance: &mut ProvenanceTracker,
    audit: &mut AuditLog,
) -> ConsensusOutcome {
    let mut report = ConsensusReport {
        attribute: attribute.to_string(),
        ..ConsensusReport::default()
    };

    let mut sources: Vec<(&str, Vec<Option<String>>)> = Vec::new();
    for source in source_priority {
        let column = source_column(attribute, source);
        match table.column_values(&column) {
            Some(values) => sources.push((
                source.as_str(),
                values.into_iter().map(|v| v.map(str::to_string)).collect(),
            )),
            None => tracing::debug!(%attribute, %source, "source has no column for attribute"),
        }
    }
    report.sources = sources.iter().map(|(name, _)| name.to_string()).collect();
    if sources.is_empty() {
        tracing::warn!(%attribute, "no source provides this attribute; consensus is all null");
    }

    let symbols: Vec<String> = (0..table.row_count())
        .map(|row| table.value(row, "symbol").unwrap_or_default().to_string())
        .collect();

    for (i, (left, left_values)) in sources.iter().enumerate() {
        for (right, right_values) in &sources[i + 1..] {
            let mut flags = Vec::with_capacity(table.row_count());
            for row in 0..table.row_count() {
                let flag = match (&left_values[row], &right_values[row]) {
                    (Some(a), Some(b)) => {
                        let agree = normalize(a) == normalize(b);
                        if agree {
                            report.agreements += 1;
                        } else {
                            report.mismatches += 1;
                            audit.push(AuditEvent::ConsensusMismatch {
                                attribute: attribute.to_string(),
                                symbol: symbols[row].clone(),
                                left: (left.to_string(), a.clone()),
                                right: (right.to_string(), b.clone()),
                            });
                        }
                        Some(agree.to_string())
                    }
                    _ => None,
                };
                flags.push(flag);
            }
            let column = match_column(attribute, left, right);
            table.put_column(&column, flags);
            provenance.record(
                &column,
                "consensus_resolver",
                &format!("whether {left} and {right} agree on {attribute} (null if either is missing)"),
            );
        }
    }

    let mut consensus = Vec::with_capacity(table.row_count());
    let mut support = Vec::with_capacity(table.row_count());
    for row in 0..table.row_count() {
        let chosen = sources
            .iter()
            .find_map(|(_, values)| values[row].clone());
        let agreeing = chosen.as_ref().map(|value| {
            let wanted = normalize(value);
            sources
                .iter()
                .filter(|(_, values)| {
                    values[row]
                        .as_deref()
                        .is_some_and(|other| normalize(other) == wanted)
                })
                .count()
        });
        if chosen.is_some() {
            report.resolved_rows += 1;
        }
        consensus.push(chosen);
        support.push(agreeing.map(|count| count.to_string()));
    }

    let priority = report.sources.join(" > ");
    let column = consensus_column(attribute);
    table.put_column(&column, consensus);
    provenance.record(
        &column,
        "consensus_resolver",
        &format!("first non-null {attribute} by source priority {priority}"),
    );
    let column = support_column(attribute);
    table.put_column(&column, support);
    provenance.record(
        &column,
        "consensus_resolver",
        &format!("number of sources agreeing with {attribute}_consensus"),
    );

    tracing::info!(
        %attribute,
        resolved = report.resolved_rows,
        mismatches = report.mismatches,
        "consensus resolved"
    );
    ConsensusOutcome { table, report }
}
