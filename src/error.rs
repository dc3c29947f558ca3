use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Source file not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    #[error("Unknown source format: {0}")]
    UnknownFormat(String),

    #[error("{0} has already been loaded (duplicate checksum). Use --force to load it again.")]
    DuplicateSource(String),

    #[error("No data in {table}. {hint}")]
    EmptyStage { table: String, hint: String },

    #[error("Chunk {chunk}: row count mismatch (expected {expected}, found {actual})")]
    ChunkMismatch {
        chunk: usize,
        expected: i64,
        actual: i64,
    },

    #[error("{stage} validation failed with {failures} issue(s)")]
    ValidationFailed { stage: String, failures: usize },

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

impl EtlError {
    pub fn empty(table: &str, hint: &str) -> Self {
        Self::EmptyStage {
            table: table.to_string(),
            hint: hint.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;
