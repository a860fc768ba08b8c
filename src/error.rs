//! Typed errors for loading, translating and executing.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing reference: {kind} '{id}'")]
    MissingReference { kind: &'static str, id: String },
    #[error("{}: {source}", .file.display())]
    Read {
        file: PathBuf,
        source: std::io::Error,
    },
    #[error("{}: invalid JSON: {source}", .file.display())]
    Parse {
        file: PathBuf,
        source: serde_json::Error,
    },
    #[error("{}: {reason}", .file.display())]
    InvalidModel { file: PathBuf, reason: String },
    #[error("model '{name}' in {} conflicts with the definition loaded from {}", .file.display(), .existing.display())]
    ConflictingModel {
        name: String,
        file: PathBuf,
        existing: PathBuf,
    },
    #[error("unknown database type '{0}'")]
    UnknownEngine(String),
    #[error("validation: {0}")]
    Validation(String),
}

/// Raised by the query translator. Carries the offending operator or field so the
/// DBO can log it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TranslateError {
    #[error("this operator is not compatible with SQL: {operator}")]
    Incompatible { operator: String },
    #[error("unsupported operator: {operator}")]
    UnsupportedOperator { operator: String },
    #[error("unknown field '{field}' on model '{model}'")]
    UnknownField { model: String, field: String },
    #[error("unknown populate '{name}' on model '{model}'")]
    UnknownPopulate { model: String, name: String },
    #[error("invalid operand for {operator}: {reason}")]
    InvalidOperand { operator: String, reason: String },
    #[error("invalid regular expression '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },
    #[error("invalid query options: {0}")]
    InvalidOptions(String),
    #[error("refused: operation requires a non-empty condition")]
    ConditionRequired,
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Translate(#[from] TranslateError),
    #[error("database: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("mongodb: {0}")]
    Mongo(#[from] mongodb::error::Error),
    #[error("unknown model: {0}")]
    UnknownModel(String),
    #[error("cast failed for '{field}': {reason}")]
    Cast { field: String, reason: String },
    #[error("invalid data: {0}")]
    InvalidData(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl DbError {
    /// True when the guard refused an unconditioned destructive operation.
    pub fn is_refusal(&self) -> bool {
        matches!(self, DbError::Translate(TranslateError::ConditionRequired))
    }
}
