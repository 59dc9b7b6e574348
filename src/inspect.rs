//! Deck inspection: note types, field order and how full each field is.

use std::fmt;
use std::path::{Path, PathBuf};

use sqlx::SqlitePool;

use crate::backend_file::split_fields;
use crate::db;
use crate::error::AugmentError;
use crate::markup;
use crate::package::{DbVariant, DeckPackage};
use crate::schema::{self, Schema};

const EXAMPLE_WIDTH: usize = 60;

#[derive(Debug, Clone)]
pub struct DeckReport {
    pub path: PathBuf,
    pub variant: DbVariant,
    pub note_types: Vec<NoteTypeReport>,
}

#[derive(Debug, Clone)]
pub struct NoteTypeReport {
    pub id: i64,
    pub name: String,
    pub notes: usize,
    pub fields: Vec<FieldReport>,
}

#[derive(Debug, Clone)]
pub struct FieldReport {
    pub index: usize,
    pub name: String,
    /// Notes where this field is not blank.
    pub filled: usize,
    /// First non-blank value, markup stripped.
    pub example: Option<String>,
}

pub async fn inspect(input: &Path) -> Result<DeckReport, AugmentError> {
    let package = DeckPackage::open(input)?;
    let pool = db::connect(package.db_path()).await?;
    let outcome = collect(&pool).await;
    pool.close().await;

    Ok(DeckReport {
        path: input.to_path_buf(),
        variant: package.variant(),
        note_types: outcome?,
    })
}

async fn collect(pool: &SqlitePool) -> Result<Vec<NoteTypeReport>, AugmentError> {
    let mut reports = Vec::new();
    for schema in schema::list_note_types(pool).await? {
        let flds: Vec<String> = sqlx::query_scalar("SELECT flds FROM notes WHERE mid = ? ORDER BY id")
            .bind(schema.id)
            .fetch_all(pool)
            .await?;
        reports.push(summarize(&schema, &flds));
    }
    Ok(reports)
}

fn summarize(schema: &Schema, notes: &[String]) -> NoteTypeReport {
    let mut fields: Vec<FieldReport> = schema
        .fields()
        .iter()
        .enumerate()
        .map(|(index, name)| FieldReport {
            index,
            name: name.clone(),
            filled: 0,
            example: None,
        })
        .collect();

    for values in notes
        .iter()
        .filter_map(|flds| split_fields(flds, schema.field_count()))
    {
        for (field, value) in fields.iter_mut().zip(values) {
            if markup::is_blank(&value) {
                continue;
            }
            field.filled += 1;
            if field.example.is_none() {
                let text = markup::strip_markup(&value);
                field.example = Some(
                    text.split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" ")
                        .chars()
                        .take(EXAMPLE_WIDTH)
                        .collect(),
                );
            }
        }
    }

    NoteTypeReport {
        id: schema.id,
        name: schema.name.clone(),
        notes: notes.len(),
        fields,
    }
}

impl fmt::Display for DeckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({})",
            self.path.display(),
            self.variant.entry_name()
        )?;
        for note_type in &self.note_types {
            write!(
                f,
                "\n  {} (id {}, {} notes)",
                note_type.name, note_type.id, note_type.notes
            )?;
            for field in &note_type.fields {
                write!(
                    f,
                    "\n    [{}] {}  {}/{}",
                    field.index, field.name, field.filled, note_type.notes
                )?;
                if let Some(example) = &field.example {
                    write!(f, "  e.g. \"{}\"", example)?;
                }
            }
        }
        Ok(())
    }
}
