//! Read-only access to the allow-listed documents.

use parley_core::contract::is_allowed_file;
use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("File not allowed")]
    NotAllowed,
    #[error("File not found")]
    NotFound,
    #[error("Failed to read file: {0}")]
    Io(#[from] io::Error),
}

/// Serves documents from one directory. Only names on the allow-list are
/// ever joined onto the root, so no request can escape it.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn read(&self, filename: &str) -> Result<String, FileError> {
        if !is_allowed_file(filename) {
            return Err(FileError::NotAllowed);
        }
        match tokio::fs::read_to_string(self.root.join(filename)).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(FileError::NotFound),
            Err(e) => Err(FileError::Io(e)),
        }
    }
}
