//! Layout error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building, saving or loading a layout
#[derive(Error, Debug)]
pub enum LayoutError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Variable table could not be parsed
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Layout artifact serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Type string does not name a supported S7 type
    #[error("Unknown type '{type_name}' for variable '{variable}'")]
    UnknownType { variable: String, type_name: String },

    /// Same variable name allocated twice while duplicates are rejected
    #[error("Duplicate variable '{name}' (DB{first_db} and DB{second_db})")]
    DuplicateVariable {
        name: String,
        first_db: u16,
        second_db: u16,
    },

    /// Artifact entry is not `[db, offset, type]` or `[db, offset, type, count]`
    #[error("Malformed layout entry for '{name}': {reason}")]
    MalformedEntry { name: String, reason: String },

    /// Artifact has no variable section
    #[error("Layout artifact has no '{0}' section")]
    MissingSection(String),

    /// Table file name carries no DB number
    #[error("No DB number in file name {0:?}")]
    MissingDbNumber(PathBuf),
}

impl From<serde_json::Error> for LayoutError {
    fn from(err: serde_json::Error) -> Self {
        LayoutError::Serialization(err.to_string())
    }
}

/// Result type alias for layout operations
pub type LayoutResult<T> = Result<T, LayoutError>;
