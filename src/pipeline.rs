use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::alias::build_alias_map;
use crate::audit::{AuditEvent, AuditLog};
use crate::authority::{AuthorityClient, CachedAuthority, LookupStats};
use crate::cache::AuthorityCache;
use crate::config::{ReconcilePlan, ResolvedConfig, SourceSpec};
use crate::consensus::{ConsensusReport, resolve_consensus};
use crate::dedup::dedupe;
use crate::error::KiraError;
use crate::merge::{SourceMatchStats, merge};
use crate::provenance::{IDENTIFIER_COLUMNS, ProvenanceDocument, ProvenanceTracker};
use crate::table::{SourceTable, Table};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedSource {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct LoadedSources {
    pub base: SourceTable,
    pub sources: Vec<SourceTable>,
    pub skipped: Vec<SkippedSource>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputPaths {
    pub table: String,
    pub provenance: String,
    pub audit: Option<String>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub rows: usize,
    pub base_rows: usize,
    pub columns: usize,
    pub sources: Vec<SourceMatchStats>,
    pub skipped_sources: Vec<SkippedSource>,
    pub consensus: Vec<ConsensusReport>,
    pub dedup_dropped: usize,
    pub alias_entries: usize,
    pub alias_conflicts: usize,
    pub identifiers_backfilled: usize,
    pub provenance_gaps: Vec<String>,
    pub audit_events: usize,
    pub lookups: LookupStats,
    pub outputs: Option<OutputPaths>,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub table: Table,
    pub provenance: ProvenanceDocument,
    pub audit: AuditLog,
    pub summary: RunSummary,
}

pub struct Reconciler<C: AuthorityClient, K: AuthorityCache> {
    authority: CachedAuthority<C, K>,
}

impl<C: AuthorityClient, K: AuthorityCache> Reconciler<C, K> {
    pub fn new(authority: CachedAuthority<C, K>) -> Self {
        Self { authority }
    }

    pub fn authority(&self) -> &CachedAuthority<C, K> {
        &self.authority
    }

    pub fn load_sources(
        &self,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<LoadedSources, KiraError> {
        let started = Instant::now();
        let base = load_one(&config.base)?;
        sink.event(ProgressEvent {
            message: format!("phase=Load; base {} rows={}", base.name, base.len()),
            elapsed: Some(started.elapsed()),
        });

        let mut sources = Vec::with_capacity(config.sources.len());
        let mut skipped = Vec::new();
        for spec in &config.sources {
            match load_one(spec) {
                Ok(table) => {
                    sink.event(ProgressEvent {
                        message: format!("phase=Load; source {} rows={}", table.name, table.len()),
                        elapsed: Some(started.elapsed()),
                    });
                    sources.push(table);
                }
                Err(err) if !spec.required => {
                    tracing::warn!(source = %spec.name, error = %err, "optional source skipped");
                    skipped.push(SkippedSource {
                        name: spec.name.to_string(),
                        reason: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }

        Ok(LoadedSources {
            base,
            sources,
            skipped,
        })
    }

    pub fn reconcile(
        &self,
        mut base: SourceTable,
        mut sources: Vec<SourceTable>,
        plan: &ReconcilePlan,
        sink: &dyn ProgressSink,
    ) -> Result<Reconciliation, KiraError> {
        let started = Instant::now();
        let mut audit = AuditLog::new();
        let mut provenance = ProvenanceTracker::new();

        let seeds = std::iter::once(&base)
            .chain(&sources)
            .flat_map(|table| table.records.iter().map(|record| record.symbol.as_str()));
        let aliases = build_alias_map(seeds, &self.authority, &mut audit);
        sink.event(ProgressEvent {
            message: format!("phase=Resolve; aliases={}", aliases.len()),
            elapsed: Some(started.elapsed()),
        });

        let mut identifiers_backfilled = 0;
        if plan.backfill_identifiers {
            identifiers_backfilled += aliases.backfill(&mut base);
            for source in &mut sources {
                identifiers_backfilled += aliases.backfill(source);
            }
            tracing::info!(filled = identifiers_backfilled, "identifiers backfilled");
        }

        let merged = merge(
            &base,
            &sources,
            &plan.merge,
            &aliases,
            &mut provenance,
            &mut audit,
        )?;
        sink.event(ProgressEvent {
            message: format!("phase=Merge; rows={}", merged.table.row_count()),
            elapsed: Some(started.elapsed()),
        });

        let mut table = merged.table;
        let mut consensus = Vec::with_capacity(plan.consensus.len());
        for spec in &plan.consensus {
            let outcome = resolve_consensus(
                table,
                &spec.attribute,
                &spec.priority,
                &mut provenance,
                &mut audit,
            );
            table = outcome.table;
            consensus.push(outcome.report);
        }

        let mut dedup_dropped = 0;
        if let Some(spec) = &plan.dedup {
            let validation_columns = spec.validation_columns.clone().unwrap_or_else(|| {
                sources
                    .iter()
                    .map(|source| format!("match_key_{}", source.name))
                    .collect()
            });
            let outcome = dedupe(
                &table,
                &spec.group_key,
                &spec.tie_break_key,
                &validation_columns,
                &mut audit,
            );
            dedup_dropped = outcome.dropped.len();
            table = outcome.table;
            sink.event(ProgressEvent {
                message: format!("phase=Dedup; dropped={dedup_dropped}"),
                elapsed: Some(started.elapsed()),
            });
        }

        let provenance_gaps = provenance.gaps(&table, &IDENTIFIER_COLUMNS);

        let summary = RunSummary {
            rows: table.row_count(),
            base_rows: merged.report.base_rows,
            columns: table.columns().len(),
            sources: merged.report.sources,
            skipped_sources: Vec::new(),
            consensus,
            dedup_dropped,
            alias_entries: aliases.len(),
            alias_conflicts: aliases.conflicts(),
            identifiers_backfilled,
            provenance_gaps,
            audit_events: audit.len(),
            lookups: self.authority.stats(),
            outputs: None,
        };

        Ok(Reconciliation {
            table,
            provenance: provenance.emit(),
            audit,
            summary,
        })
    }

    pub fn run(
        &self,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, KiraError> {
        let started = Instant::now();
        let loaded = self.load_sources(config, sink)?;
        let mut result = self.reconcile(loaded.base, loaded.sources, &config.plan, sink)?;

        for skipped in &loaded.skipped {
            result.audit.push(AuditEvent::SourceSkipped {
                source: skipped.name.clone(),
                reason: skipped.reason.clone(),
            });
        }
        result.summary.skipped_sources = loaded.skipped;
        result.summary.audit_events = result.audit.len();

        let paths = companion_paths(&config.output.table, config.output.audit);
        result.table.write_tsv(&config.output.table)?;
        result.provenance.write(Utf8Path::new(&paths.provenance))?;
        if let Some(audit_path) = &paths.audit {
            result.audit.write(Utf8Path::new(audit_path))?;
        }
        result.summary.outputs = Some(paths.clone());
        write_summary(&result.summary, Utf8Path::new(&paths.summary))?;

        sink.event(ProgressEvent {
            message: format!(
                "phase=Write; rows={} path={}",
                result.summary.rows, config.output.table
            ),
            elapsed: Some(started.elapsed()),
        });
        tracing::info!(
            rows = result.summary.rows,
            output = %config.output.table,
            "reconciliation complete"
        );
        Ok(result.summary)
    }
}

fn load_one(spec: &SourceSpec) -> Result<SourceTable, KiraError> {
    SourceTable::load(
        spec.name.clone(),
        &spec.path,
        spec.delimiter.as_byte(),
        &spec.columns,
    )
}

pub fn companion_paths(table: &Utf8Path, audit: bool) -> OutputPaths {
    let stem = table.file_stem().unwrap_or("reconciled");
    let sibling = |suffix: &str| -> Utf8PathBuf { table.with_file_name(format!("{stem}.{suffix}")) };
    OutputPaths {
        table: table.to_string(),
        provenance: sibling("provenance.json").to_string(),
        audit: audit.then(|| sibling("audit.log").to_string()),
        summary: sibling("summary.json").to_string(),
    }
}

fn write_summary(summary: &RunSummary, path: &Utf8Path) -> Result<(), KiraError> {
    let json = serde_json::to_vec_pretty(summary)
        .map_err(|err| KiraError::Filesystem(err.to_string()))?;
    crate::fs_util::write_bytes_atomic(path, &json)
}
