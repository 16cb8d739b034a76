use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LookupMode {
    Symbol,
    StableId,
    XrefId,
}

impl fmt::Display for LookupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupMode::Symbol => write!(f, "symbol"),
            LookupMode::StableId => write!(f, "stable_id"),
            LookupMode::XrefId => write!(f, "xref_id"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityRecord {
    #[serde(default)]
    pub canonical_symbol: Option<String>,
    #[serde(default)]
    pub stable_id: Option<String>,
    #[serde(default)]
    pub aliases: BTreeSet<String>,
    #[serde(default)]
    pub previous_symbols: BTreeSet<String>,
    #[serde(default)]
    pub xref_id: Option<String>,
}

impl AuthorityRecord {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.canonical_symbol.is_none()
            && self.stable_id.is_none()
            && self.aliases.is_empty()
            && self.previous_symbols.is_empty()
            && self.xref_id.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinKey {
    PrimaryId,
    XrefId,
    Symbol,
    Alias,
}

impl JoinKey {
    pub fn default_priority() -> Vec<JoinKey> {
        vec![
            JoinKey::PrimaryId,
            JoinKey::XrefId,
            JoinKey::Symbol,
            JoinKey::Alias,
        ]
    }
}

impl fmt::Display for JoinKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinKey::PrimaryId => write!(f, "primary_id"),
            JoinKey::XrefId => write!(f, "xref_id"),
            JoinKey::Symbol => write!(f, "symbol"),
            JoinKey::Alias => write!(f, "alias"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceName(String);

impl SourceName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SourceName {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_');
        if !is_valid {
            return Err(KiraError::InvalidSourceName(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for SourceName {
    type Error = KiraError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SourceName> for String {
    fn from(value: SourceName) -> Self {
        value.0
    }
}
