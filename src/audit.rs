use std::fmt;

use camino::Utf8Path;

use crate::error::KiraError;
use crate::fs_util::write_bytes_atomic;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditEvent {
    FuzzyMatch {
        source: String,
        base_symbol: String,
        matched_symbol: String,
        rule: String,
    },
    AmbiguousMatch {
        source: String,
        base_symbol: String,
        candidates: Vec<String>,
    },
    RejectedCandidates {
        source: String,
        base_symbol: String,
        key: String,
        kept_row: usize,
        rejected_rows: Vec<usize>,
    },
    ConsensusMismatch {
        attribute: String,
        symbol: String,
        left: (String, String),
        right: (String, String),
    },
    DedupDrop {
        group_key: String,
        dropped_row: usize,
        dropped_tie_break: Option<String>,
        kept_row: usize,
        reason: String,
    },
    AliasConflict {
        alias: String,
        previous: String,
        winner: String,
    },
    SourceSkipped {
        source: String,
        reason: String,
    },
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEvent::FuzzyMatch {
                source,
                base_symbol,
                matched_symbol,
                rule,
            } => write!(
                f,
                "fuzzy-match\tsource={source}\tbase={base_symbol}\tmatched={matched_symbol}\trule={rule}"
            ),
            AuditEvent::AmbiguousMatch {
                source,
                base_symbol,
                candidates,
            } => write!(
                f,
                "ambiguous-match\tsource={source}\tbase={base_symbol}\tcandidates={}",
                candidates.join(",")
            ),
            AuditEvent::RejectedCandidates {
                source,
                base_symbol,
                key,
                kept_row,
                rejected_rows,
            } => write!(
                f,
                "rejected-candidates\tsource={source}\tbase={base_symbol}\tkey={key}\tkept_row={kept_row}\trejected_rows={}",
                rejected_rows
                    .iter()
                    .map(usize::to_string)
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            AuditEvent::ConsensusMismatch {
                attribute,
                symbol,
                left,
                right,
            } => write!(
                f,
                "consensus-mismatch\tattribute={attribute}\tsymbol={symbol}\t{}={}\t{}={}",
                left.0, left.1, right.0, right.1
            ),
            AuditEvent::DedupDrop {
                group_key,
                dropped_row,
                dropped_tie_break,
                kept_row,
                reason,
            } => write!(
                f,
                "dedup-drop\tgroup={group_key}\tdropped_row={dropped_row}\ttie_break={}\tkept_row={kept_row}\treason={reason}",
                dropped_tie_break.as_deref().unwrap_or("NA")
            ),
            AuditEvent::AliasConflict {
                alias,
                previous,
                winner,
            } => write!(
                f,
                "alias-conflict\talias={alias}\tprevious={previous}\twinner={winner}"
            ),
            AuditEvent::SourceSkipped { source, reason } => {
                write!(f, "source-skipped\tsource={source}\treason={reason}")
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    events: Vec<AuditEvent>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: AuditEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for event in &self.events {
            out.push_str(&event.to_string());
            out.push('\n');
        }
        out
    }

    pub fn write(&self, path: &Utf8Path) -> Result<(), KiraError> {
        write_bytes_atomic(path, self.render().as_bytes())
    }
}
