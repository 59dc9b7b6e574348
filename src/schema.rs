//! Note type schemas and their resolution from a collection database.
//!
//! Field positions are always read from the collection, never assumed:
//! two decks can declare the same field at different indexes.
//!
//! Modern collections keep note types in the `notetypes` table and their
//! fields in `fields` (`ntid`, `ord`, `name`). Legacy collections store a
//! JSON object in `col.models`, keyed by note type id:
//!
//! ```text
//! {"1342697561419": {"name": "Basic", "flds": [{"name": "Front", "ord": 0}, ...]}}
//! ```

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use sqlx::{Row, SqlitePool};

use crate::error::AugmentError;

/// A note type with its authoritative field order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    pub id: i64,
    pub name: String,
    fields: Vec<String>,
    index_by_name: HashMap<String, usize>,
}

impl Schema {
    pub fn new(id: i64, name: impl Into<String>, fields: Vec<String>) -> Self {
        let index_by_name = fields
            .iter()
            .enumerate()
            .map(|(i, f)| (f.clone(), i))
            .collect();
        Self {
            id,
            name: name.into(),
            fields,
            index_by_name,
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.index_by_name.get(name).copied()
    }

    /// Index of `name`, or `FieldNotFound`.
    pub fn require_field(&self, name: &str) -> Result<usize, AugmentError> {
        self.field_index(name)
            .ok_or_else(|| AugmentError::FieldNotFound {
                field: name.to_string(),
                note_type: self.name.clone(),
                available: self.fields.clone(),
            })
    }

    /// Pick the schema called `name` out of a listing.
    pub fn select(schemas: Vec<Schema>, name: &str) -> Result<Schema, AugmentError> {
        let available: Vec<String> = schemas.iter().map(|s| s.name.clone()).collect();
        schemas
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| AugmentError::ModelNotFound {
                name: name.to_string(),
                available,
            })
    }
}

/// Resolve a note type by name against the collection database.
pub async fn resolve(pool: &SqlitePool, name: &str) -> Result<Schema, AugmentError> {
    Schema::select(list_note_types(pool).await?, name)
}

/// Every note type in the collection, ordered by id.
pub async fn list_note_types(pool: &SqlitePool) -> Result<Vec<Schema>, AugmentError> {
    let modern: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type = 'table' AND name = 'notetypes'",
    )
    .fetch_one(pool)
    .await?;

    if modern {
        list_modern(pool).await
    } else {
        list_legacy(pool).await
    }
}

async fn list_modern(pool: &SqlitePool) -> Result<Vec<Schema>, AugmentError> {
    let types = sqlx::query("SELECT id, name FROM notetypes ORDER BY id")
        .fetch_all(pool)
        .await?;

    let mut fields: BTreeMap<i64, Vec<(i64, String)>> = BTreeMap::new();
    for row in sqlx::query("SELECT ntid, ord, name FROM fields")
        .fetch_all(pool)
        .await?
    {
        fields
            .entry(row.get("ntid"))
            .or_default()
            .push((row.get("ord"), row.get("name")));
    }

    Ok(types
        .iter()
        .map(|row| {
            let id: i64 = row.get("id");
            let mut declared = fields.remove(&id).unwrap_or_default();
            declared.sort_by_key(|(ord, _)| *ord);
            Schema::new(
                id,
                row.get::<String, _>("name"),
                declared.into_iter().map(|(_, name)| name).collect(),
            )
        })
        .collect())
}

#[derive(Deserialize)]
struct LegacyModel {
    name: String,
    #[serde(default)]
    flds: Vec<LegacyField>,
}

#[derive(Deserialize)]
struct LegacyField {
    name: String,
    ord: i64,
}

async fn list_legacy(pool: &SqlitePool) -> Result<Vec<Schema>, AugmentError> {
    let models: Option<String> =
        sqlx::query_scalar::<_, Option<String>>("SELECT models FROM col LIMIT 1")
            .fetch_optional(pool)
            .await?
            .flatten();

    let Some(models) = models.filter(|m| !m.trim().is_empty()) else {
        return Ok(Vec::new());
    };

    parse_legacy_models(&models)
}

fn parse_legacy_models(json: &str) -> Result<Vec<Schema>, AugmentError> {
    let models: HashMap<String, LegacyModel> = serde_json::from_str(json)
        .map_err(|e| AugmentError::archive("col.models", format!("invalid JSON: {}", e)))?;

    let mut schemas: Vec<Schema> = models
        .into_iter()
        .filter_map(|(id, mut model)| {
            let id = id.parse::<i64>().ok()?;
            model.flds.sort_by_key(|f| f.ord);
            let fields = model.flds.into_iter().map(|f| f.name).collect();
            Some(Schema::new(id, model.name, fields))
        })
        .collect();
    schemas.sort_by_key(|s| s.id);
    Ok(schemas)
}
