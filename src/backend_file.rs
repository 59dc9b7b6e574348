use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::backend::{DeckBackend, FieldUpdate};
use crate::error::AugmentError;
use crate::markup;
use crate::models::Candidate;
use crate::schema::{self, Schema};

/// Field separator in `notes.flds`.
pub const FIELD_SEPARATOR: char = '\x1f';

/// Writes straight into an extracted collection database.
///
/// Updates land in the working copy only; the caller repackages once after
/// the run.
pub struct FileBackend {
    pool: SqlitePool,
}

impl FileBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeckBackend for FileBackend {
    fn kind(&self) -> &'static str {
        "file"
    }

    async fn resolve_schema(&self, note_type: &str) -> Result<Schema, AugmentError> {
        schema::resolve(&self.pool, note_type).await
    }

    async fn find_candidates(
        &self,
        schema: &Schema,
        target_field: &str,
    ) -> Result<Vec<Candidate>, AugmentError> {
        let target = schema.require_field(target_field)?;

        let rows = sqlx::query("SELECT id, flds FROM notes WHERE mid = ? ORDER BY id")
            .bind(schema.id)
            .fetch_all(&self.pool)
            .await?;

        let mut candidates = Vec::new();
        for row in rows {
            let note_id: i64 = row.get("id");
            let flds: String = row.get("flds");

            let Some(values) = split_fields(&flds, schema.field_count()) else {
                tracing::warn!(
                    note_id,
                    expected = schema.field_count(),
                    "note has more fields than its note type, skipping"
                );
                continue;
            };

            if markup::is_blank(&values[target]) {
                candidates.push(Candidate {
                    note_id,
                    fields: schema.fields().iter().cloned().zip(values).collect(),
                });
            }
        }

        Ok(candidates)
    }

    async fn apply(&self, schema: &Schema, update: &FieldUpdate) -> Result<bool, AugmentError> {
        let index = schema.require_field(&update.field)?;

        let flds: Option<String> = sqlx::query_scalar("SELECT flds FROM notes WHERE id = ?")
            .bind(update.note_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(flds) = flds else {
            return Ok(false);
        };

        let mut values = split_fields(&flds, schema.field_count()).ok_or_else(|| {
            AugmentError::archive(
                "notes",
                format!(
                    "note {} has more fields than note type '{}'",
                    update.note_id, schema.name
                ),
            )
        })?;
        values[index] = update.content.clone();

        let joined = values.join(&FIELD_SEPARATOR.to_string());
        let result = sqlx::query("UPDATE notes SET flds = ?, mod = ? WHERE id = ?")
            .bind(joined)
            .bind(chrono::Utc::now().timestamp())
            .bind(update.note_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }
}

/// Split stored fields, padding short notes to `count`.
///
/// Returns `None` when the note has more fields than its type declares.
pub fn split_fields(flds: &str, count: usize) -> Option<Vec<String>> {
    let mut values: Vec<String> = flds.split(FIELD_SEPARATOR).map(str::to_string).collect();
    if values.len() > count {
        return None;
    }
    values.resize(count, String::new());
    Some(values)
}
