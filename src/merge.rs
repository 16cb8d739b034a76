use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::alias::AliasMap;
use crate::audit::{AuditEvent, AuditLog};
use crate::domain::JoinKey;
use crate::error::KiraError;
use crate::normalize::{accession_key, normalize, strip_trailing_digits};
use crate::provenance::ProvenanceTracker;
use crate::table::{SourceRecord, SourceTable, Table};

pub const CANONICAL_SYMBOL_COLUMN: &str = "canonical_symbol";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzyConfig {
    #[serde(default = "default_true")]
    pub strip_trailing_digits: bool,
    #[serde(default = "default_true")]
    pub prefix_containment: bool,
    #[serde(default = "default_min_prefix_len")]
    pub min_prefix_len: usize,
}

impl Default for FuzzyConfig {
    fn default() -> Self {
        Self {
            strip_trailing_digits: true,
            prefix_containment: true,
            min_prefix_len: default_min_prefix_len(),
        }
    }
}

impl FuzzyConfig {
    pub fn disabled() -> Self {
        Self {
            strip_trailing_digits: false,
            prefix_containment: false,
            min_prefix_len: default_min_prefix_len(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_min_prefix_len() -> usize {
    3
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    pub join_priority: Vec<JoinKey>,
    pub fuzzy: FuzzyConfig,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            join_priority: JoinKey::default_priority(),
            fuzzy: FuzzyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MatchRule {
    Exact(JoinKey),
    TrailingDigits,
    PrefixContainment,
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchRule::Exact(key) => write!(f, "{key}"),
            MatchRule::TrailingDigits => write!(f, "fuzzy_trailing_digits"),
            MatchRule::PrefixContainment => write!(f, "fuzzy_prefix"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SourceMatchStats {
    pub source: String,
    pub source_rows: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub by_rule: BTreeMap<String, usize>,
    pub ambiguous: usize,
    pub multi_candidate: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub base_rows: usize,
    pub sources: Vec<SourceMatchStats>,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub table: Table,
    pub report: MergeReport,
}

pub fn source_column(attribute: &str, source: &str) -> String {
    format!("{attribute}_{source}")
}

/// Joins every source onto the base table. The result has exactly one row per
/// base record, in base order; each source contributes `symbol_{source}`,
/// `match_key_{source}` and one `{attribute}_{source}` column per attribute,
/// all null where the row found no partner.
pub fn merge(
    base: &SourceTable,
    sources: &[SourceTable],
    options: &MergeOptions,
    aliases: &AliasMap,
    provenance: &mut ProvenanceTracker,
    audit: &mut AuditLog,
) -> Result<MergeOutcome, KiraError> {
    let base_name = base.name.as_str();
    let mut table = Table::with_rows(base.len());

    table.set_column(
        "symbol",
        base.records.iter().map(|r| Some(r.symbol.clone())).collect(),
    )?;
    table.set_column(
        "primary_id",
        base.records.iter().map(|r| r.primary_id.clone()).collect(),
    )?;
    table.set_column(
        "xref_id",
        base.records.iter().map(|r| r.xref_id.clone()).collect(),
    )?;
    table.set_column(
        CANONICAL_SYMBOL_COLUMN,
        base.records
            .iter()
            .map(|r| Some(aliases.resolve(&r.symbol)).filter(|s| !s.is_empty()))
            .collect(),
    )?;
    provenance.record(
        CANONICAL_SYMBOL_COLUMN,
        "alias_resolver",
        &format!("{base_name} symbol resolved through the authority alias map"),
    );

    for (index, attribute) in base.attribute_names.iter().enumerate() {
        let column = source_column(attribute, base_name);
        table.set_column(
            &column,
            base.records
                .iter()
                .map(|r| r.attribute(index).map(str::to_string))
                .collect(),
        )?;
        provenance.record(&column, base_name, &format!("{attribute} as listed by {base_name}"));
    }

    let mut report = MergeReport {
        base_rows: base.len(),
        sources: Vec::new(),
    };

    for source in sources {
        let name = source.name.as_str();
        let (matches, stats) = match_source(base, source, options, aliases, audit);
        tracing::info!(
            source = %name,
            matched = stats.matched,
            unmatched = stats.unmatched,
            ambiguous = stats.ambiguous,
            "source merged"
        );

        let symbol_column = source_column("symbol", name);
        table.set_column(
            &symbol_column,
            matches
                .iter()
                .map(|m| m.map(|(row, _)| source.records[row].symbol.clone()))
                .collect(),
        )?;
        provenance.record(&symbol_column, name, &format!("symbol of the matched {name} row"));

        let key_column = source_column("match_key", name);
        table.set_column(
            &key_column,
            matches
                .iter()
                .map(|m| m.map(|(_, rule)| rule.to_string()))
                .collect(),
        )?;
        provenance.record(
            &key_column,
            "merge_engine",
            &format!("join key or fuzzy rule that matched the {name} row"),
        );

        for (index, attribute) in source.attribute_names.iter().enumerate() {
            let column = source_column(attribute, name);
            table.set_column(
                &column,
                matches
                    .iter()
                    .map(|m| {
                        m.and_then(|(row, _)| source.records[row].attribute(index))
                            .map(str::to_string)
                    })
                    .collect(),
            )?;
            provenance.record(&column, name, &format!("{attribute} as listed by {name}"));
        }
        report.sources.push(stats);
    }

    Ok(MergeOutcome { table, report })
}

fn key_value(record: &SourceRecord, key: JoinKey, aliases: &AliasMap) -> Option<String> {
    let value = match key {
        JoinKey::PrimaryId => accession_key(record.primary_id.as_deref()?),
        JoinKey::XrefId => accession_key(record.xref_id.as_deref()?),
        JoinKey::Symbol => normalize(&record.symbol),
        JoinKey::Alias => normalize(&aliases.resolve(&record.symbol)),
    };
    (!value.is_empty()).then_some(value)
}

fn index_source(
    source: &SourceTable,
    key: JoinKey,
    aliases: &AliasMap,
) -> HashMap<String, Vec<usize>> {
    let mut index: HashMap<String, Vec<usize>> = HashMap::new();
    for (row, record) in source.records.iter().enumerate() {
        if let Some(value) = key_value(record, key, aliases) {
            index.entry(value).or_default().push(row);
        }
    }
    index
}

type RowMatch = Option<(usize, MatchRule)>;

fn match_source(
    base: &SourceTable,
    source: &SourceTable,
    options: &MergeOptions,
    aliases: &AliasMap,
    audit: &mut AuditLog,
) -> (Vec<RowMatch>, SourceMatchStats) {
    let name = source.name.as_str();
    let mut matches: Vec<RowMatch> = vec![None; base.len()];
    let mut unresolved: Vec<usize> = (0..base.len()).collect();
    let mut stats = SourceMatchStats {
        source: name.to_string(),
        source_rows: source.len(),
        ..SourceMatchStats::default()
    };

    let mut seen_keys = HashSet::new();
    for &key in &options.join_priority {
        if !seen_keys.insert(key) || unresolved.is_empty() {
            continue;
        }
        let index = index_source(source, key, aliases);
        unresolved.retain(|&row| {
            let Some(value) = key_value(&base.records[row], key, aliases) else {
                return true;
            };
            let Some(candidates) = index.get(&value) else {
                return true;
            };
            let kept = candidates[0];
            if candidates.len() > 1 {
                stats.multi_candidate += 1;
                tracing::debug!(
                    source = %name,
                    base = %base.records[row].symbol,
                    %key,
                    rejected = candidates.len() - 1,
                    "several source rows share a join key; keeping the first"
                );
                audit.push(AuditEvent::RejectedCandidates {
                    source: name.to_string(),
                    base_symbol: base.records[row].symbol.clone(),
                    key: key.to_string(),
                    kept_row: kept,
                    rejected_rows: candidates[1..].to_vec(),
                });
            }
            matches[row] = Some((kept, MatchRule::Exact(key)));
            false
        });
    }

    if !unresolved.is_empty()
        && (options.fuzzy.strip_trailing_digits || options.fuzzy.prefix_containment)
    {
        let fuzzy = FuzzyIndex::new(source);
        for &row in &unresolved {
            let base_symbol = &base.records[row].symbol;
            match fuzzy.find(base_symbol, &options.fuzzy) {
                FuzzyOutcome::Matched(source_row, rule) => {
                    audit.push(AuditEvent::FuzzyMatch {
                        source: name.to_string(),
                        base_symbol: base_symbol.clone(),
                        matched_symbol: source.records[source_row].symbol.clone(),
                        rule: rule.to_string(),
                    });
                    matches[row] = Some((source_row, rule));
                }
                FuzzyOutcome::Ambiguous(candidates) => {
                    stats.ambiguous += 1;
                    tracing::debug!(
                        source = %name,
                        base = %base_symbol,
                        candidates = ?candidates,
                        "ambiguous fuzzy match left unmatched"
                    );
                    audit.push(AuditEvent::AmbiguousMatch {
                        source: name.to_string(),
                        base_symbol: base_symbol.clone(),
                        candidates,
                    });
                }
                FuzzyOutcome::NoMatch => {}
            }
        }
    }

    for (_, rule) in matches.iter().flatten() {
        *stats.by_rule.entry(rule.to_string()).or_default() += 1;
        stats.matched += 1;
    }
    stats.unmatched = base.len() - stats.matched;
    (matches, stats)
}

#[derive(Debug, PartialEq, Eq)]
enum FuzzyOutcome {
    Matched(usize, MatchRule),
    Ambiguous(Vec<String>),
    NoMatch,
}

struct FuzzyIndex {
    by_symbol: HashMap<String, usize>,
    symbols: Vec<(String, usize)>,
}

impl FuzzyIndex {
    fn new(source: &SourceTable) -> Self {
        let mut by_symbol = HashMap::new();
        let mut symbols = Vec::new();
        for (row, record) in source.records.iter().enumerate() {
            let symbol = normalize(&record.symbol);
            if symbol.is_empty() || by_symbol.contains_key(&symbol) {
                continue;
            }
            by_symbol.insert(symbol.clone(), row);
            symbols.push((symbol, row));
        }
        Self { by_symbol, symbols }
    }

    fn find(&self, base_symbol: &str, config: &FuzzyConfig) -> FuzzyOutcome {
        if config.strip_trailing_digits {
            let stripped = strip_trailing_digits(base_symbol);
            if !stripped.is_empty() {
                if let Some(&row) = self.by_symbol.get(&stripped) {
                    return FuzzyOutcome::Matched(row, MatchRule::TrailingDigits);
                }
            }
        }
        if !config.prefix_containment {
            return FuzzyOutcome::NoMatch;
        }

        let base = normalize(base_symbol);
        if base.chars().count() < config.min_prefix_len {
            return FuzzyOutcome::NoMatch;
        }
        let qualified: Vec<&(String, usize)> = self
            .symbols
            .iter()
            .filter(|(symbol, _)| symbol.chars().count() >= config.min_prefix_len)
            .filter(|(symbol, _)| symbol.starts_with(&base) || base.starts_with(symbol.as_str()))
            .collect();
        let Some(longest) = qualified.iter().map(|(s, _)| s.chars().count()).max() else {
            return FuzzyOutcome::NoMatch;
        };
        let best: Vec<&(String, usize)> = qualified
            .into_iter()
            .filter(|(s, _)| s.chars().count() == longest)
            .collect();
        match best.as_slice() {
            [(_, row)] => FuzzyOutcome::Matched(*row, MatchRule::PrefixContainment),
            _ => FuzzyOutcome::Ambiguous(best.iter().map(|(s, _)| s.clone()).collect()),
        }
    }
}
