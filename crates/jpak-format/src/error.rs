use thiserror::Error;

/// Errors that can occur when working with JPAK packages.
#[derive(Debug, Error)]
pub enum Error {
    /// The package layout is invalid.
    #[error("invalid jpak format: {0}")]
    InvalidFormat(String),

    /// No file entry exists at the requested path.
    #[error("entry not found: {0}")]
    NotFound(String),

    /// The builder was given conflicting entries.
    #[error("builder error: {0}")]
    BuilderError(String),

    /// I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON parsing error in the file table.
    #[error("json parsing error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type for jpak-format operations.
pub type Result<T> = std::result::Result<T, Error>;
