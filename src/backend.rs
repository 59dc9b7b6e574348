//! The capability set both write paths provide.
//!
//! A backend can resolve a note type, list the notes needing augmentation,
//! and persist one generated field. The file backend works on an extracted
//! collection database; the remote backend talks to a running Anki through
//! AnkiConnect. They share nothing but this contract.
//!
//! # Usage
//!
//! ```rust,no_run
//! # async fn demo(backend: &dyn deck_augment::backend::DeckBackend) -> Result<(), deck_augment::error::AugmentError> {
//! let schema = backend.resolve_schema("Cloze").await?;
//! let candidates = backend.find_candidates(&schema, "Notes").await?;
//! println!("{} notes need augmentation", candidates.len());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;

use crate::error::AugmentError;
use crate::models::Candidate;
use crate::schema::Schema;

/// A single field write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldUpdate {
    pub note_id: i64,
    pub field: String,
    pub content: String,
}

#[async_trait]
pub trait DeckBackend: Send + Sync {
    /// Short label for logs and the summary (`"file"`, `"remote"`).
    fn kind(&self) -> &'static str;

    /// Look up a note type and its field order by live introspection.
    async fn resolve_schema(&self, note_type: &str) -> Result<Schema, AugmentError>;

    /// Notes of `schema` whose `target_field` is blank, ascending by id.
    ///
    /// Re-derived on every call; nothing is cached between runs.
    async fn find_candidates(
        &self,
        schema: &Schema,
        target_field: &str,
    ) -> Result<Vec<Candidate>, AugmentError>;

    /// Persist one generated field.
    ///
    /// Returns `Ok(false)` when the note no longer exists. Does not check
    /// whether the field is still empty; candidate selection guarantees
    /// that for the run.
    async fn apply(&self, schema: &Schema, update: &FieldUpdate) -> Result<bool, AugmentError>;
}
