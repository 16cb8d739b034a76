use std::collections::BTreeSet;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};

use kira_geneset_reconciler::authority::{AuthorityClient, CachedAuthority};
use kira_geneset_reconciler::cache::MemoryAuthorityCache;
use kira_geneset_reconciler::config::ConfigLoader;
use kira_geneset_reconciler::domain::{AuthorityRecord, LookupMode};
use kira_geneset_reconciler::error::KiraError;
use kira_geneset_reconciler::normalize::normalize;
use kira_geneset_reconciler::output::JsonOutput;
use kira_geneset_reconciler::pipeline::Reconciler;
use kira_geneset_reconciler::provenance::ProvenanceDocument;

struct MockAuthority {
    records: Vec<AuthorityRecord>,
}

impl AuthorityClient for MockAuthority {
    fn fetch(&self, query: &str, _mode: LookupMode) -> Result<Option<AuthorityRecord>, KiraError> {
        let wanted = normalize(query);
        Ok(self
            .records
            .iter()
            .find(|record| {
                record.canonical_symbol.as_deref() == Some(wanted.as_str())
                    || record.aliases.contains(&wanted)
            })
            .cloned())
    }
}

fn record(symbol: &str, hgnc: &str, aliases: &[&str]) -> AuthorityRecord {
    AuthorityRecord {
        canonical_symbol: Some(symbol.to_string()),
        stable_id: Some(hgnc.to_string()),
        aliases: aliases.iter().map(|a| a.to_string()).collect::<BTreeSet<_>>(),
        previous_symbols: BTreeSet::new(),
        xref_id: None,
    }
}

fn authority() -> MockAuthority {
    MockAuthority {
        records: vec![
            record("TP1", "HGNC:1", &[]),
            record("TP2", "HGNC:2", &[]),
            record("G1", "HGNC:3", &["ABC1"]),
        ],
    }
}

fn write(root: &Utf8Path, name: &str, content: &str) {
    fs::write(root.join(name), content).unwrap();
}

fn workspace(extra_sources: &str) -> (tempfile::TempDir, Utf8PathBuf) {
    workspace_with(extra_sources, "")
}

fn workspace_with(extra_sources: &str, extra_config: &str) -> (tempfile::TempDir, Utf8PathBuf) {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    write(
        &root,
        "census.tsv",
        "symbol\thgnc_id\tensembl_gene_id\tfamily\n\
         TP1\tHGNC:1\tENSG00000000011\tF1\n\
         TP2\tHGNC:2\tENSG00000000002\tF2\n\
         G1\tHGNC:3\t\tF3\n\
         TP1\tHGNC:1\tENSG00000000001.4\tF1\n",
    );
    write(&root, "a.tsv", "gene\tclass\nTP1\tKinase\nTP2\tKinase\nABC1\tKinase\n");
    write(&root, "b.csv", "gene_symbol,class\nTP1,Phosphatase\n");
    let config = format!(
        r#"{{
            "base": {{ "name": "census", "path": "census.tsv" }},
            "sources": [
                {{ "name": "a", "path": "a.tsv" }},
                {{ "name": "b", "path": "b.csv" }}{extra_sources}
            ],
            "consensus": [{{ "attribute": "class", "priority": ["a", "b"] }}],
            {extra_config}
            "output": {{ "table": "out/kinases.tsv" }}
        }}"#
    );
    write(&root, "kira-gsr.json", &config);
    let config_path = root.join("kira-gsr.json");
    (temp, config_path)
}

fn reconciler() -> Reconciler<MockAuthority, MemoryAuthorityCache> {
    Reconciler::new(CachedAuthority::new(authority(), MemoryAuthorityCache::new()))
}

#[test]
fn reconcile_resolves_consensus_across_sources() {
    let (_temp, config_path) = workspace("");
    let config = ConfigLoader::resolve(Some(config_path.as_str())).unwrap();
    let reconciler = reconciler();
    let loaded = reconciler.load_sources(&config, &JsonOutput).unwrap();
    let result = reconciler
        .reconcile(loaded.base, loaded.sources, &config.plan, &JsonOutput)
        .unwrap();
    let table = &result.table;

    // No dedup block: the default symbol grouping drops the TP1 with the larger accession.
    assert_eq!(result.summary.base_rows, 4);
    assert_eq!(table.row_count(), 3);
    assert_eq!(result.summary.dedup_dropped, 1);

    let row = |symbol: &str| {
        (0..table.row_count())
            .find(|&row| table.value(row, "symbol") == Some(symbol))
            .unwrap()
    };

    let tp1 = row("TP1");
    assert_eq!(table.value(tp1, "xref_id"), Some("ENSG00000000001.4"));
    assert_eq!(table.value(tp1, "class_consensus"), Some("Kinase"));
    assert_eq!(table.value(tp1, "class_match_a_b"), Some("false"));
    assert_eq!(table.value(tp1, "class_support"), Some("1"));

    let tp2 = row("TP2");
    assert_eq!(table.value(tp2, "class_consensus"), Some("Kinase"));
    assert_eq!(table.value(tp2, "class_match_a_b"), None);
    assert_eq!(table.value(tp2, "symbol_b"), None);

    let g1 = row("G1");
    assert_eq!(table.value(g1, "symbol_a"), Some("ABC1"));
    assert_eq!(table.value(g1, "match_key_a"), Some("alias"));
    assert_eq!(table.value(g1, "canonical_symbol"), Some("G1"));
    assert_eq!(table.value(g1, "family_census"), Some("F3"));

    assert!(result.summary.provenance_gaps.is_empty());
    for column in table.columns() {
        if !["symbol", "primary_id", "xref_id"].contains(&column.as_str()) {
            assert!(result.provenance.contains(column), "{column} lacks provenance");
        }
    }
}

#[test]
fn duplicates_survive_when_dedup_is_off() {
    let (_temp, config_path) = workspace_with("", r#""dedup": { "enabled": false },"#);
    let config = ConfigLoader::resolve(Some(config_path.as_str())).unwrap();
    let reconciler = reconciler();
    let loaded = reconciler.load_sources(&config, &JsonOutput).unwrap();
    let result = reconciler
        .reconcile(loaded.base, loaded.sources, &config.plan, &JsonOutput)
        .unwrap();

    assert_eq!(result.table.row_count(), 4);
    assert_eq!(result.summary.dedup_dropped, 0);
}

#[test]
fn each_distinct_symbol_is_looked_up_once() {
    let (_temp, config_path) = workspace("");
    let config = ConfigLoader::resolve(Some(config_path.as_str())).unwrap();
    let reconciler = reconciler();
    let loaded = reconciler.load_sources(&config, &JsonOutput).unwrap();
    reconciler
        .reconcile(loaded.base, loaded.sources, &config.plan, &JsonOutput)
        .unwrap();

    // TP1, TP2, G1 and ABC1, regardless of how many rows mention them.
    let stats = reconciler.authority().stats();
    assert_eq!(stats.network_calls, 4);
    assert_eq!(stats.failures, 0);
}

#[test]
fn run_writes_table_and_companions() {
    let (_temp, config_path) = workspace("");
    let config = ConfigLoader::resolve(Some(config_path.as_str())).unwrap();
    let summary = reconciler().run(&config, &JsonOutput).unwrap();

    let outputs = summary.outputs.clone().unwrap();
    let table = fs::read_to_string(&outputs.table).unwrap();
    let header = table.lines().next().unwrap();
    assert!(header.starts_with("symbol\tprimary_id\txref_id\tcanonical_symbol"));
    assert!(header.contains("class_match_a_b"));
    assert_eq!(table.lines().count(), 4);

    let provenance: ProvenanceDocument =
        serde_json::from_str(&fs::read_to_string(&outputs.provenance).unwrap()).unwrap();
    assert_eq!(
        provenance.get("class_consensus").unwrap().source,
        "consensus_resolver"
    );
    assert_eq!(provenance.get("match_key_b").unwrap().source, "merge_engine");

    let audit = fs::read_to_string(outputs.audit.unwrap()).unwrap();
    assert!(audit.contains("consensus-mismatch\tattribute=class\tsymbol=TP1"));
    assert!(audit.contains("dedup-drop\tgroup=TP1"));

    let written: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&outputs.summary).unwrap()).unwrap();
    assert_eq!(written["rows"], 3);
}

#[test]
fn optional_missing_source_is_skipped() {
    let (_temp, config_path) = workspace(
        r#", { "name": "c", "path": "missing.tsv", "required": false }"#,
    );
    let config = ConfigLoader::resolve(Some(config_path.as_str())).unwrap();
    let summary = reconciler().run(&config, &JsonOutput).unwrap();

    assert_eq!(summary.skipped_sources.len(), 1);
    assert_eq!(summary.skipped_sources[0].name, "c");
    assert_eq!(summary.rows, 3);
    let audit = fs::read_to_string(summary.outputs.unwrap().audit.unwrap()).unwrap();
    assert!(audit.contains("source-skipped\tsource=c"));
}

#[test]
fn required_missing_source_fails_before_writing() {
    let (_temp, config_path) = workspace(r#", { "name": "c", "path": "missing.tsv" }"#);
    let config = ConfigLoader::resolve(Some(config_path.as_str())).unwrap();
    let err = reconciler().run(&config, &JsonOutput).unwrap_err();
    assert!(matches!(err, KiraError::MissingRequiredInput(_)));
    assert!(!config.output.table.exists());
}

#[test]
fn source_without_symbol_column_is_a_schema_mismatch() {
    let (_temp, config_path) = workspace(r#", { "name": "c", "path": "bad.tsv" }"#);
    let root = config_path.parent().unwrap();
    write(root, "bad.tsv", "protein\tclass\nP1\tKinase\n");
    let config = ConfigLoader::resolve(Some(config_path.as_str())).unwrap();
    let err = reconciler().run(&config, &JsonOutput).unwrap_err();
    assert!(matches!(err, KiraError::SchemaMismatch { ref source_name, .. } if source_name == "c"));
}

#[test]
fn repeated_runs_are_identical() {
    let (_temp, config_path) = workspace("");
    let config = ConfigLoader::resolve(Some(config_path.as_str())).unwrap();
    let reconciler = reconciler();
    let tables: Vec<String> = (0..2)
        .map(|_| {
            reconciler.run(&config, &JsonOutput).unwrap();
            fs::read_to_string(&config.output.table).unwrap()
        })
        .collect();
    assert_eq!(tables[0], tables[1]);
}
