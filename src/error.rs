use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("missing config file kira-gsr.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("invalid source name {0:?}: use ASCII letters, digits and underscores")]
    InvalidSourceName(String),

    #[error("required input missing: {0}")]
    #[diagnostic(help("check the paths in the run config"))]
    MissingRequiredInput(String),

    #[error("source {source_name} has no recognizable {field} column (header: {header})")]
    SchemaMismatch {
        source_name: String,
        field: String,
        header: String,
    },

    #[error("failed to parse table {path}: {message}")]
    TableParse { path: String, message: String },

    #[error("authority request failed: {0}")]
    AuthorityHttp(String),

    #[error("authority returned status {status}: {message}")]
    AuthorityStatus { status: u16, message: String },

    #[error("authority lookup unavailable for {query}: {reason}")]
    LookupUnavailable { query: String, reason: String },

    #[error("authority cache error: {0}")]
    Cache(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
