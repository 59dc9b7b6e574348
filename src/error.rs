//! Error taxonomy for the augmentation pipeline.
//!
//! Errors fall into two groups:
//!
//! - **Fatal**: the archive is unreadable, the note type or a field cannot
//!   be resolved, the configuration is unusable, or the working database
//!   fails. These abort the run before anything is written.
//! - **Per-candidate**: a prompt placeholder is missing, the generation
//!   backend gives up, or a remote update call fails. These are recorded
//!   against the note and the run carries on.
//!
//! [`AugmentError::is_fatal`] encodes the split; the pipeline relies on it
//! when a write-back call fails.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AugmentError {
    #[error("invalid deck archive {}: {reason}", .path.display())]
    ArchiveFormat { path: PathBuf, reason: String },

    #[error("failed to repackage deck: {reason}")]
    Repackaging { reason: String },

    #[error("note type '{name}' not found (available: {})", .available.join(", "))]
    ModelNotFound { name: String, available: Vec<String> },

    #[error("field '{field}' not found in note type '{note_type}' (available: {})", .available.join(", "))]
    FieldNotFound {
        field: String,
        note_type: String,
        available: Vec<String>,
    },

    #[error("prompt references field '{field}' which the note does not have")]
    MissingField { field: String },

    #[error("generation failed after {attempts} attempt(s): {reason}")]
    GenerationService { reason: String, attempts: u32 },

    #[error("AnkiConnect {action} failed: {reason}")]
    Remote { action: String, reason: String },

    #[error("configuration error: {message}")]
    Config { message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AugmentError {
    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            AugmentError::MissingField { .. }
                | AugmentError::GenerationService { .. }
                | AugmentError::Remote { .. }
        )
    }

    /// Short, stable label used in the end-of-run failure listing.
    pub fn class(&self) -> &'static str {
        match self {
            AugmentError::ArchiveFormat { .. } => "archive-format",
            AugmentError::Repackaging { .. } => "repackaging",
            AugmentError::ModelNotFound { .. } => "model-not-found",
            AugmentError::FieldNotFound { .. } => "field-not-found",
            AugmentError::MissingField { .. } => "missing-field",
            AugmentError::GenerationService { .. } => "generation-service",
            AugmentError::Remote { .. } => "remote-rpc",
            AugmentError::Config { .. } => "config",
            AugmentError::Database(_) => "database",
            AugmentError::Io(_) => "io",
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        AugmentError::Config {
            message: message.into(),
        }
    }

    pub(crate) fn archive(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        AugmentError::ArchiveFormat {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn repackaging(reason: impl ToString) -> Self {
        AugmentError::Repackaging {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn remote(action: &str, reason: impl ToString) -> Self {
        AugmentError::Remote {
            action: action.to_string(),
            reason: reason.to_string(),
        }
    }
}
