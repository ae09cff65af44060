use crate::pack::ValidationError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Storage backend failure (wraps rusqlite::Error)
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Every validation problem found, never just the first one
    #[error("Validation failed with {} error(s)", .0.len())]
    Validation(Vec<ValidationError>),

    #[error("Integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    #[error("Could not find a free id for imported session {id} after {attempts} attempts")]
    ImportCollision { id: String, attempts: usize },

    #[error("A session with id {0} is already stored")]
    SessionExists(String),

    #[error("Unknown stimulus pack {id}@{version}")]
    UnknownPack { id: String, version: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
