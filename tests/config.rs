use std::fs;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_geneset_reconciler::config::{
    Config, ConfigLoader, ConsensusEntry, ConsensusEntryObject, Delimiter, SourceEntry,
    SourceEntryObject,
};
use kira_geneset_reconciler::domain::JoinKey;
use kira_geneset_reconciler::error::KiraError;

fn detailed(name: &str, path: &str) -> SourceEntry {
    SourceEntry::Detailed(SourceEntryObject {
        name: name.to_string(),
        path: path.to_string(),
        required: None,
        delimiter: None,
        columns: None,
    })
}

fn config(sources: Vec<SourceEntry>, consensus: Vec<ConsensusEntry>) -> Config {
    serde_json::from_value::<Config>(serde_json::json!({
        "base": { "name": "hgnc", "path": "hgnc.tsv" },
        "output": { "table": "out.tsv", "audit": false }
    }))
    .map(|mut config| {
        config.sources = sources;
        config.consensus = consensus;
        config
    })
    .unwrap()
}

#[test]
fn consensus_priority_defaults_to_config_order() {
    let resolved = ConfigLoader::resolve_config(config(
        vec![detailed("kinhub", "kinhub.tsv"), detailed("manning", "manning.csv")],
        vec![ConsensusEntry::Shorthand("group".to_string())],
    ))
    .unwrap();

    assert_eq!(
        resolved.plan.consensus[0].priority,
        vec!["hgnc", "kinhub", "manning"]
    );
    assert_eq!(resolved.sources[1].delimiter, Delimiter::Comma);
    assert!(resolved.sources[0].required);
    assert!(!resolved.output.audit);
    assert_eq!(resolved.plan.merge.join_priority, JoinKey::default_priority());
    let dedup = resolved.plan.dedup.unwrap();
    assert_eq!(dedup.group_key, "symbol");
    assert_eq!(dedup.tie_break_key, "xref_id");
}

#[test]
fn dedup_can_be_switched_off() {
    let config: Config = serde_json::from_str(
        r#"{
            "base": "hgnc.tsv",
            "dedup": { "enabled": false },
            "output": { "table": "out.tsv" }
        }"#,
    )
    .unwrap();
    let resolved = ConfigLoader::resolve_config(config).unwrap();
    assert!(resolved.plan.dedup.is_none());
}

#[test]
fn duplicate_source_names_are_rejected() {
    let err = ConfigLoader::resolve_config(config(
        vec![detailed("kinhub", "a.tsv"), detailed("kinhub", "b.tsv")],
        Vec::new(),
    ))
    .unwrap_err();
    assert_matches!(err, KiraError::InvalidConfig(_));
}

#[test]
fn unknown_priority_source_is_rejected() {
    let err = ConfigLoader::resolve_config(config(
        vec![detailed("kinhub", "a.tsv")],
        vec![ConsensusEntry::Detailed(ConsensusEntryObject {
            attribute: "group".to_string(),
            priority: Some(vec!["kinhub".to_string(), "uniprot".to_string()]),
        })],
    ))
    .unwrap_err();
    assert_matches!(err, KiraError::InvalidConfig(_));
}

#[test]
fn invalid_source_name_is_rejected() {
    let err =
        ConfigLoader::resolve_config(config(vec![detailed("kin-hub", "a.tsv")], Vec::new()))
            .unwrap_err();
    assert_matches!(err, KiraError::InvalidSourceName(_));
}

#[test]
fn missing_base_is_a_missing_input() {
    let config: Config =
        serde_json::from_str(r#"{ "output": { "table": "out.tsv" } }"#).unwrap();
    let err = ConfigLoader::resolve_config(config).unwrap_err();
    assert_matches!(err, KiraError::MissingRequiredInput(_));
}

#[test]
fn missing_output_is_a_missing_input() {
    let config: Config = serde_json::from_str(r#"{ "base": "hgnc.tsv" }"#).unwrap();
    let err = ConfigLoader::resolve_config(config).unwrap_err();
    assert_matches!(err, KiraError::MissingRequiredInput(_));
}

#[test]
fn paths_resolve_against_config_directory() {
    let temp = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
    let path = root.join("run.json");
    fs::write(
        &path,
        r#"{
            "base": "lists/hgnc.tsv.gz",
            "sources": [{ "name": "kinhub", "path": "kinhub.tsv", "required": false }],
            "join_priority": ["xref_id", "symbol"],
            "fuzzy": { "prefix_containment": false },
            "dedup": {},
            "backfill_identifiers": true,
            "authority": { "cache_path": "cache/authority.json" },
            "output": { "table": "out/merged.tsv" }
        }"#,
    )
    .unwrap();

    let resolved = ConfigLoader::resolve(Some(path.as_str())).unwrap();
    assert_eq!(resolved.base.path, root.join("lists/hgnc.tsv.gz"));
    assert_eq!(resolved.base.name.as_str(), "hgnc");
    assert_eq!(resolved.base.delimiter, Delimiter::Tab);
    assert!(!resolved.sources[0].required);
    assert_eq!(resolved.output.table, root.join("out/merged.tsv"));
    assert_eq!(
        resolved.authority.cache_path,
        Some(root.join("cache/authority.json"))
    );
    assert_eq!(
        resolved.plan.merge.join_priority,
        vec![JoinKey::XrefId, JoinKey::Symbol]
    );
    assert!(resolved.plan.merge.fuzzy.strip_trailing_digits);
    assert!(!resolved.plan.merge.fuzzy.prefix_containment);
    assert_eq!(resolved.plan.merge.fuzzy.min_prefix_len, 3);
    let dedup = resolved.plan.dedup.unwrap();
    assert_eq!(dedup.group_key, "symbol");
    assert_eq!(dedup.tie_break_key, "xref_id");
    assert!(dedup.validation_columns.is_none());
    assert!(resolved.plan.backfill_identifiers);
}

#[test]
fn unreadable_config_path() {
    let err = ConfigLoader::resolve(Some("/nonexistent/kira-gsr.json")).unwrap_err();
    assert_matches!(err, KiraError::ConfigRead(_));
}

#[test]
fn malformed_config_is_a_parse_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("kira-gsr.json");
    fs::write(&path, "{ base: ").unwrap();
    let err = ConfigLoader::resolve(path.to_str()).unwrap_err();
    assert_matches!(err, KiraError::ConfigParse(_));
}
