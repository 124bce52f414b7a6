use std::path::{Path, PathBuf};

use crate::types::BurrowError;
use thiserror::Error;

/// Error type for administrative operations.
#[derive(Debug, Error)]
pub enum AdminError {
    /// Database directory not found at the specified path.
    #[error("database not found: {0}")]
    MissingDatabase(PathBuf),
    /// A numbered file the operation needs does not exist.
    #[error("file not found: {0}")]
    MissingFile(PathBuf),
    /// Custom error message.
    #[error("{0}")]
    Message(String),
    /// Storage engine error.
    #[error(transparent)]
    Core(#[from] BurrowError),
    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type alias for administrative operations.
pub type Result<T> = std::result::Result<T, AdminError>;

impl AdminError {
    pub(crate) fn missing_database(path: impl AsRef<Path>) -> Self {
        AdminError::MissingDatabase(path.as_ref().to_path_buf())
    }

    pub(crate) fn missing_file(path: impl AsRef<Path>) -> Self {
        AdminError::MissingFile(path.as_ref().to_path_buf())
    }
}
