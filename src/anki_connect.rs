//! AnkiConnect RPC client and the remote write-back backend.
//!
//! Every call is a `POST` of `{"action", "version", "params"}` to the
//! add-on's HTTP endpoint; the reply is exactly `{"result", "error"}` and a
//! non-null `error` means the action failed. Only transport failures are
//! retried: an `error` reply is the add-on's final answer.
//!
//! Actions used:
//!
//! | Action | Purpose |
//! |--------|---------|
//! | `modelNamesAndIds` | list note types |
//! | `modelFieldNames` | ordered field names of a note type |
//! | `findNotes` | note ids matching a search query |
//! | `notesInfo` | field values for a batch of notes |
//! | `updateNoteFields` | write named fields of one note |

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::backend::{DeckBackend, FieldUpdate};
use crate::config::RemoteConfig;
use crate::error::AugmentError;
use crate::markup;
use crate::models::Candidate;
use crate::retry::{self, Backoff};
use crate::schema::Schema;

pub struct AnkiConnect {
    client: reqwest::Client,
    url: String,
    version: u32,
    max_retries: u32,
    backoff: Backoff,
}

#[derive(Debug, Deserialize)]
pub struct NoteInfo {
    #[serde(rename = "noteId")]
    pub note_id: i64,
    #[serde(rename = "modelName", default)]
    pub model_name: String,
    pub fields: HashMap<String, NoteField>,
}

#[derive(Debug, Deserialize)]
pub struct NoteField {
    pub value: String,
    pub order: usize,
}

impl AnkiConnect {
    pub fn new(config: &RemoteConfig) -> Result<Self, AugmentError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AugmentError::config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            url: config.url.clone(),
            version: config.version,
            max_retries: config.max_retries,
            backoff: Backoff::new(250, 2000),
        })
    }

    pub async fn invoke(&self, action: &str, params: Value) -> Result<Value, AugmentError> {
        let body = json!({
            "action": action,
            "version": self.version,
            "params": params,
        });

        let mut attempt = 0;
        let response = loop {
            match self.client.post(&self.url).json(&body).send().await {
                Ok(response) => break response,
                Err(e) if retry::is_transient_error(&e) && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::debug!(action, attempt, error = %e, "retrying AnkiConnect call");
                    self.backoff.sleep(attempt).await;
                }
                Err(e) => {
                    return Err(AugmentError::remote(
                        action,
                        format!(
                            "could not reach AnkiConnect at {} ({}); is Anki running with the add-on installed?",
                            self.url, e
                        ),
                    ))
                }
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(AugmentError::remote(action, format!("HTTP {}", status)));
        }

        let reply: Value = response
            .json()
            .await
            .map_err(|e| AugmentError::remote(action, format!("invalid response: {}", e)))?;
        unwrap_reply(action, reply)
    }

    /// Note type name → id.
    pub async fn model_names_and_ids(&self) -> Result<BTreeMap<String, i64>, AugmentError> {
        let result = self.invoke("modelNamesAndIds", json!({})).await?;
        decode("modelNamesAndIds", result)
    }

    pub async fn model_field_names(&self, model_name: &str) -> Result<Vec<String>, AugmentError> {
        let result = self
            .invoke("modelFieldNames", json!({ "modelName": model_name }))
            .await?;
        decode("modelFieldNames", result)
    }

    pub async fn find_notes(&self, query: &str) -> Result<Vec<i64>, AugmentError> {
        let result = self.invoke("findNotes", json!({ "query": query })).await?;
        decode("findNotes", result)
    }

    /// Field values for `ids`. Ids that no longer exist are left out.
    pub async fn notes_info(&self, ids: &[i64]) -> Result<Vec<NoteInfo>, AugmentError> {
        let result = self.invoke("notesInfo", json!({ "notes": ids })).await?;
        let entries: Vec<Value> = decode("notesInfo", result)?;
        Ok(entries
            .into_iter()
            .filter_map(|entry| serde_json::from_value(entry).ok())
            .collect())
    }

    pub async fn update_note_fields(
        &self,
        note_id: i64,
        fields: &HashMap<String, String>,
    ) -> Result<(), AugmentError> {
        self.invoke(
            "updateNoteFields",
            json!({ "note": { "id": note_id, "fields": fields } }),
        )
        .await?;
        Ok(())
    }
}

fn unwrap_reply(action: &str, reply: Value) -> Result<Value, AugmentError> {
    let Some(obj) = reply.as_object() else {
        return Err(AugmentError::remote(action, "response is not a JSON object"));
    };
    if obj.len() != 2 || !obj.contains_key("result") || !obj.contains_key("error") {
        return Err(AugmentError::remote(
            action,
            "response has an unexpected number of fields",
        ));
    }
    match &obj["error"] {
        Value::Null => Ok(obj["result"].clone()),
        Value::String(message) => Err(AugmentError::remote(action, message)),
        other => Err(AugmentError::remote(action, other)),
    }
}

fn decode<T: serde::de::DeserializeOwned>(action: &str, result: Value) -> Result<T, AugmentError> {
    serde_json::from_value(result)
        .map_err(|e| AugmentError::remote(action, format!("unexpected result shape: {}", e)))
}

/// Quote a note type name for an Anki search (`note:"..."`).
pub fn note_type_query(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len() + 8);
    for c in name.chars() {
        if matches!(c, '\\' | '"' | '*' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    format!("\"note:{}\"", escaped)
}

/// Applies results to a running Anki, one update call per note.
pub struct RemoteBackend {
    rpc: AnkiConnect,
    batch_size: usize,
}

impl RemoteBackend {
    pub fn new(rpc: AnkiConnect, batch_size: usize) -> Self {
        Self {
            rpc,
            batch_size: batch_size.max(1),
        }
    }
}

#[async_trait]
impl DeckBackend for RemoteBackend {
    fn kind(&self) -> &'static str {
        "remote"
    }

    async fn resolve_schema(&self, note_type: &str) -> Result<Schema, AugmentError> {
        let models = self.rpc.model_names_and_ids().await?;
        let Some(&id) = models.get(note_type) else {
            return Err(AugmentError::ModelNotFound {
                name: note_type.to_string(),
                available: models.into_keys().collect(),
            });
        };
        let fields = self.rpc.model_field_names(note_type).await?;
        Ok(Schema::new(id, note_type, fields))
    }

    async fn find_candidates(
        &self,
        schema: &Schema,
        target_field: &str,
    ) -> Result<Vec<Candidate>, AugmentError> {
        schema.require_field(target_field)?;

        let mut ids = self.rpc.find_notes(&note_type_query(&schema.name)).await?;
        ids.sort_unstable();
        tracing::debug!(notes = ids.len(), note_type = %schema.name, "fetched note ids");

        let mut candidates = Vec::new();
        for batch in ids.chunks(self.batch_size) {
            for info in self.rpc.notes_info(batch).await? {
                if info.fields.len() != schema.field_count() {
                    tracing::warn!(
                        note_id = info.note_id,
                        model = %info.model_name,
                        "note fields do not match note type, skipping"
                    );
                    continue;
                }
                let blank = info
                    .fields
                    .get(target_field)
                    .is_some_and(|f| markup::is_blank(&f.value));
                if blank {
                    candidates.push(Candidate {
                        note_id: info.note_id,
                        fields: info
                            .fields
                            .into_iter()
                            .map(|(name, field)| (name, field.value))
                            .collect(),
                    });
                }
            }
        }

        candidates.sort_by_key(|c| c.note_id);
        Ok(candidates)
    }

    async fn apply(&self, _schema: &Schema, update: &FieldUpdate) -> Result<bool, AugmentError> {
        let fields = HashMap::from([(update.field.clone(), update.content.clone())]);
        self.rpc.update_note_fields(update.note_id, &fields).await?;
        Ok(true)
    }
}
