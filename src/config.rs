use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::authority::DEFAULT_BASE_URL;
use crate::domain::{JoinKey, SourceName};
use crate::error::KiraError;
use crate::merge::{FuzzyConfig, MergeOptions};
use crate::table::ColumnAliases;

pub const DEFAULT_CONFIG_FILE: &str = "kira-gsr.json";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub base: Option<SourceEntry>,
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
    #[serde(default)]
    pub join_priority: Option<Vec<JoinKey>>,
    #[serde(default)]
    pub fuzzy: Option<FuzzyConfig>,
    #[serde(default)]
    pub consensus: Vec<ConsensusEntry>,
    #[serde(default)]
    pub dedup: Option<DedupEntry>,
    #[serde(default)]
    pub backfill_identifiers: bool,
    #[serde(default)]
    pub authority: Option<AuthorityEntry>,
    #[serde(default)]
    pub output: Option<OutputEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum SourceEntry {
    Shorthand(String),
    Detailed(SourceEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SourceEntryObject {
    pub name: String,
    pub path: String,
    #[serde(default)]
    pub required: Option<bool>,
    #[serde(default)]
    pub delimiter: Option<Delimiter>,
    #[serde(default)]
    pub columns: Option<ColumnAliases>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Delimiter {
    Tab,
    Comma,
}

impl Delimiter {
    pub fn as_byte(self) -> u8 {
        match self {
            Delimiter::Tab => b'\t',
            Delimiter::Comma => b',',
        }
    }

    fn infer(path: &Utf8Path) -> Self {
        let name = path.as_str().to_ascii_lowercase();
        if name.ends_with(".csv") || name.ends_with(".csv.gz") {
            Delimiter::Comma
        } else {
            Delimiter::Tab
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ConsensusEntry {
    Shorthand(String),
    Detailed(ConsensusEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ConsensusEntryObject {
    pub attribute: String,
    #[serde(default)]
    pub priority: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DedupEntry {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub group_key: Option<String>,
    #[serde(default)]
    pub tie_break_key: Option<String>,
    #[serde(default)]
    pub validation_columns: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AuthorityEntry {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub cache_path: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OutputEntry {
    pub table: String,
    #[serde(default)]
    pub audit: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpec {
    pub name: SourceName,
    pub path: Utf8PathBuf,
    pub required: bool,
    pub delimiter: Delimiter,
    pub columns: ColumnAliases,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsensusSpec {
    pub attribute: String,
    pub priority: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupSpec {
    pub group_key: String,
    pub tie_break_key: String,
    // `None` means "any validation source matched the row".
    pub validation_columns: Option<Vec<String>>,
}

impl Default for DedupSpec {
    fn default() -> Self {
        Self {
            group_key: "symbol".to_string(),
            tie_break_key: "xref_id".to_string(),
            validation_columns: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub merge: MergeOptions,
    pub consensus: Vec<ConsensusSpec>,
    pub dedup: Option<DedupSpec>,
    pub backfill_identifiers: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthoritySettings {
    pub base_url: String,
    pub cache_path: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub table: Utf8PathBuf,
    pub audit: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub base: SourceSpec,
    pub sources: Vec<SourceSpec>,
    pub plan: ReconcilePlan,
    pub authority: AuthoritySettings,
    pub output: OutputSpec,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(KiraError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| KiraError::ConfigParse(err.to_string()))?;

        let root = config_path
            .parent()
            .and_then(|parent| Utf8PathBuf::from_path_buf(parent.to_path_buf()).ok())
            .unwrap_or_default();
        Self::resolve_config_in(config, &root)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, KiraError> {
        Self::resolve_config_in(config, Utf8Path::new(""))
    }

    fn resolve_config_in(config: Config, root: &Utf8Path) -> Result<ResolvedConfig, KiraError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(KiraError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let base_entry = config
            .base
            .ok_or_else(|| KiraError::MissingRequiredInput("config value `base`".to_string()))?;
        let mut base = resolve_source(base_entry, root)?;
        base.required = true;

        let sources = config
            .sources
            .into_iter()
            .map(|entry| resolve_source(entry, root))
            .collect::<Result<Vec<_>, KiraError>>()?;

        let mut names = HashSet::new();
        for spec in std::iter::once(&base).chain(&sources) {
            if !names.insert(spec.name.clone()) {
                return Err(KiraError::InvalidConfig(format!(
                    "duplicate source name {}",
                    spec.name
                )));
            }
        }

        let default_priority: Vec<String> = std::iter::once(&base)
            .chain(&sources)
            .map(|spec| spec.name.to_string())
            .collect();
        let consensus = config
            .consensus
            .into_iter()
            .map(|entry| {
                let (attribute, priority) = match entry {
                    ConsensusEntry::Shorthand(attribute) => (attribute, None),
                    ConsensusEntry::Detailed(obj) => (obj.attribute, obj.priority),
                };
                let attribute = crate::normalize::column_name(&attribute);
                if attribute.is_empty() {
                    return Err(KiraError::InvalidConfig(
                        "consensus attribute must not be empty".to_string(),
                    ));
                }
                let priority = priority.unwrap_or_else(|| default_priority.clone());
                if let Some(unknown) = priority
                    .iter()
                    .find(|name| !names.iter().any(|known| known.as_str() == name.as_str()))
                {
                    return Err(KiraError::InvalidConfig(format!(
                        "consensus priority for {attribute} names unknown source {unknown}"
                    )));
                }
                Ok(ConsensusSpec {
                    attribute,
                    priority,
                })
            })
            .collect::<Result<Vec<_>, KiraError>>()?;

        // Dedup runs unless the config turns it off with `"enabled": false`.
        let dedup = match config.dedup {
            Some(DedupEntry {
                enabled: Some(false),
                ..
            }) => None,
            Some(entry) => Some(DedupSpec {
                group_key: entry.group_key.unwrap_or_else(|| "symbol".to_string()),
                tie_break_key: entry.tie_break_key.unwrap_or_else(|| "xref_id".to_string()),
                validation_columns: entry.validation_columns,
            }),
            None => Some(DedupSpec::default()),
        };

        let merge = MergeOptions {
            join_priority: config
                .join_priority
                .unwrap_or_else(JoinKey::default_priority),
            fuzzy: config.fuzzy.unwrap_or_default(),
        };
        if merge.join_priority.is_empty() {
            return Err(KiraError::InvalidConfig(
                "join_priority must name at least one key".to_string(),
            ));
        }

        let authority = match config.authority {
            Some(entry) => AuthoritySettings {
                base_url: entry
                    .base_url
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                cache_path: entry.cache_path.map(|path| root.join(path)),
            },
            None => AuthoritySettings {
                base_url: DEFAULT_BASE_URL.to_string(),
                cache_path: None,
            },
        };

        let output_entry = config
            .output
            .ok_or_else(|| KiraError::MissingRequiredInput("config value `output.table`".to_string()))?;
        if output_entry.table.trim().is_empty() {
            return Err(KiraError::MissingRequiredInput(
                "config value `output.table`".to_string(),
            ));
        }
        let output = OutputSpec {
            table: root.join(output_entry.table.trim()),
            audit: output_entry.audit.unwrap_or(true),
        };

        Ok(ResolvedConfig {
            schema_version,
            base,
            sources,
            plan: ReconcilePlan {
                merge,
                consensus,
                dedup,
                backfill_identifiers: config.backfill_identifiers,
            },
            authority,
            output,
        })
    }
}

fn resolve_source(entry: SourceEntry, root: &Utf8Path) -> Result<SourceSpec, KiraError> {
    match entry {
        SourceEntry::Shorthand(path) => {
            let path = root.join(path.trim());
            let name = source_name_from_path(&path)?;
            Ok(SourceSpec {
                name,
                delimiter: Delimiter::infer(&path),
                path,
                required: true,
                columns: ColumnAliases::default(),
            })
        }
        SourceEntry::Detailed(obj) => {
            let path = root.join(obj.path.trim());
            Ok(SourceSpec {
                name: obj.name.parse()?,
                delimiter: obj.delimiter.unwrap_or_else(|| Delimiter::infer(&path)),
                path,
                required: obj.required.unwrap_or(true),
                columns: obj.columns.unwrap_or_default(),
            })
        }
    }
}

fn source_name_from_path(path: &Utf8Path) -> Result<SourceName, KiraError> {
    let file_name = path.file_name().unwrap_or_default();
    let stem = file_name.split('.').next().unwrap_or_default();
    crate::normalize::column_name(stem).parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_shorthand() {
        let config: Config = serde_json::from_str(
            r#"{
                "base": "lists/hgnc_kinases.tsv",
                "sources": ["manning.csv"],
                "consensus": ["Kinase Group"],
                "output": { "table": "out/kinases.tsv" }
            }"#,
        )
        .unwrap();

        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.schema_version, 1);
        assert_eq!(resolved.base.name.as_str(), "hgnc_kinases");
        assert_eq!(resolved.sources[0].delimiter, Delimiter::Comma);
        assert_eq!(resolved.base.delimiter, Delimiter::Tab);
        assert_eq!(resolved.plan.consensus[0].attribute, "kinase_group");
        assert_eq!(
            resolved.plan.consensus[0].priority,
            vec!["hgnc_kinases".to_string(), "manning".to_string()]
        );
        assert_eq!(resolved.plan.merge, MergeOptions::default());
        assert!(resolved.output.audit);
    }
}
