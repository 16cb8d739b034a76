use std::collections::{BTreeSet, HashMap};

use crate::audit::{AuditEvent, AuditLog};
use crate::authority::{AuthorityClient, CachedAuthority};
use crate::cache::AuthorityCache;
use crate::domain::{AuthorityRecord, LookupMode};
use crate::normalize::normalize;
use crate::table::SourceTable;

// Conflicting claims on one alias resolve last-write-wins; each overwrite is audited.
#[derive(Debug, Clone, Default)]
pub struct AliasMap {
    map: HashMap<String, String>,
    records: HashMap<String, AuthorityRecord>,
    conflicts: usize,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, alias: &str, canonical: &str) -> Option<String> {
        let key = normalize(alias);
        if key.is_empty() {
            return None;
        }
        let previous = self.map.insert(key, canonical.trim().to_string())?;
        if normalize(&previous) == normalize(canonical) {
            return None;
        }
        self.conflicts += 1;
        Some(previous)
    }

    pub fn resolve(&self, raw_symbol: &str) -> String {
        let key = normalize(raw_symbol);
        match self.map.get(&key) {
            Some(canonical) => canonical.clone(),
            None => key,
        }
    }

    pub fn contains(&self, raw_symbol: &str) -> bool {
        self.map.contains_key(&normalize(raw_symbol))
    }

    pub fn record_for(&self, raw_symbol: &str) -> Option<&AuthorityRecord> {
        self.records.get(&normalize(raw_symbol))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn conflicts(&self) -> usize {
        self.conflicts
    }

    pub fn backfill(&self, table: &mut SourceTable) -> usize {
        let mut filled = 0;
        for record in &mut table.records {
            let Some(found) = self.record_for(&record.symbol) else {
                continue;
            };
            if record.primary_id.is_none() {
                if let Some(id) = &found.stable_id {
                    record.primary_id = Some(id.clone());
                    filled += 1;
                }
            }
            if record.xref_id.is_none() {
                if let Some(id) = &found.xref_id {
                    record.xref_id = Some(id.clone());
                    filled += 1;
                }
            }
        }
        filled
    }
}

// Seeds are visited once each, in sorted normalized order.
pub fn build_alias_map<'a, C, K, I>(
    seeds: I,
    authority: &CachedAuthority<C, K>,
    audit: &mut AuditLog,
) -> AliasMap
where
    C: AuthorityClient,
    K: AuthorityCache,
    I: IntoIterator<Item = &'a str>,
{
    let distinct: BTreeSet<String> = seeds
        .into_iter()
        .map(normalize)
        .filter(|seed| !seed.is_empty())
        .collect();
    tracing::info!(seeds = distinct.len(), "building alias map");

    let mut aliases = AliasMap::new();
    for seed in &distinct {
        let record = authority.lookup(seed, LookupMode::Symbol);
        let Some(canonical) = record.canonical_symbol.clone() else {
            tracing::debug!(%seed, "no canonical symbol from authority");
            continue;
        };

        let forms = std::iter::once(canonical.as_str())
            .chain(std::iter::once(seed.as_str()))
            .chain(record.aliases.iter().map(String::as_str))
            .chain(record.previous_symbols.iter().map(String::as_str));
        for form in forms {
            if let Some(previous) = aliases.insert(form, &canonical) {
                tracing::warn!(
                    alias = %normalize(form),
                    %previous,
                    %canonical,
                    "alias claimed by two canonical symbols; keeping the later one"
                );
                audit.push(AuditEvent::AliasConflict {
                    alias: normalize(form),
                    previous,
                    winner: canonical.clone(),
                });
            }
        }
        aliases.records.insert(seed.clone(), record);
    }
    tracing::info!(
        entries = aliases.len(),
        conflicts = aliases.conflicts(),
        "alias map ready"
    );
    aliases
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_falls_back_to_normalized_input() {
        let mut aliases = AliasMap::new();
        aliases.insert("erk2", "MAPK1");
        assert_eq!(aliases.resolve(" ERK2 "), "MAPK1");
        assert_eq!(aliases.resolve("unknown1"), "UNKNOWN1");
        assert!(aliases.contains("Erk2"));
    }

    #[test]
    fn later_insert_wins_and_is_counted() {
        let mut aliases = AliasMap::new();
        assert_eq!(aliases.insert("p38", "MAPK14"), None);
        assert_eq!(aliases.insert("P38", "mapk14"), None);
        assert_eq!(aliases.insert("p38", "MAPK11"), Some("mapk14".to_string()));
        assert_eq!(aliases.resolve("p38"), "MAPK11");
        assert_eq!(aliases.conflicts(), 1);
    }

    #[test]
    fn blank_alias_is_ignored() {
        let mut aliases = AliasMap::new();
        assert_eq!(aliases.insert("  ", "X"), None);
        assert!(aliases.is_empty());
    }
}
