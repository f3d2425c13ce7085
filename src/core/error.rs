//! Error types for the LOD engine

use std::path::PathBuf;
use thiserror::Error;

use crate::math::QuadPos;

/// Crate-wide result alias
pub type Result<T> = std::result::Result<T, LodError>;

/// Main error type for the LOD engine
#[derive(Debug, Error)]
pub enum LodError {
    #[error("Encoding range error: {field} = {value} ({reason})")]
    EncodingRange {
        field: &'static str,
        value: i64,
        reason: &'static str,
    },

    #[error("Invalid detail level: {0}")]
    InvalidLevel(String),

    #[error("Position {0} is outside the covered area")]
    OutOfBounds(QuadPos),

    #[error("No file for section {0}")]
    NotFound(QuadPos),

    #[error("Corrupt file {path:?}: {reason}")]
    CorruptFile { path: PathBuf, reason: String },

    #[error("Version mismatch in {path:?}: found {found}, supported {supported:?}")]
    VersionMismatch {
        path: PathBuf,
        found: u8,
        supported: Vec<u8>,
    },

    #[error("Source for section {0} was superseded")]
    StaleSource(QuadPos),

    #[error("Render buffer swap already pending for section {0}")]
    SwapConflict(QuadPos),

    #[error("Source for section {0} was disposed")]
    Disposed(QuadPos),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LodError {
    /// File-layer errors are recovered by regenerating the section.
    pub fn is_recoverable_file_error(&self) -> bool {
        matches!(
            self,
            LodError::NotFound(_) | LodError::CorruptFile { .. } | LodError::VersionMismatch { .. }
        )
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        LodError::CorruptFile {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
