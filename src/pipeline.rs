//! End-to-end augmentation runs.
//!
//! [`augment`] drives any [`DeckBackend`]: resolve the schema, validate the
//! fields the run touches, select candidates, generate with bounded
//! concurrency, then apply results one at a time. [`augment_file`] and
//! [`augment_remote`] wrap it with the setup each write path needs.
//!
//! Fatal errors (bad archive, unknown note type or field, database
//! failures) abort before the archive is rewritten, so a failed file run
//! never leaves an output behind. Per-note failures are collected into the
//! [`RunSummary`].

use std::path::Path;

use crate::anki_connect::{AnkiConnect, RemoteBackend};
use crate::backend::{DeckBackend, FieldUpdate};
use crate::backend_file::FileBackend;
use crate::config::RemoteConfig;
use crate::db;
use crate::error::AugmentError;
use crate::generate::GenerationClient;
use crate::models::{FailureRecord, Outcome, PlannedNote, RunSummary};
use crate::package::DeckPackage;
use crate::scheduler;
use crate::template::PromptTemplate;

const PREVIEW_WIDTH: usize = 80;

/// Settings for one run, fixed before it starts.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub note_type: String,
    pub target_field: String,
    pub template: PromptTemplate,
    pub concurrency: usize,
    pub dry_run: bool,
}

impl RunConfig {
    /// Field shown in dry-run previews.
    fn preview_field(&self) -> &str {
        self.template
            .placeholders()
            .first()
            .map(String::as_str)
            .unwrap_or(&self.target_field)
    }
}

pub async fn augment(
    backend: &dyn DeckBackend,
    run: &RunConfig,
    client: Option<&GenerationClient>,
) -> Result<RunSummary, AugmentError> {
    let schema = backend.resolve_schema(&run.note_type).await?;
    schema.require_field(&run.target_field)?;
    for placeholder in run.template.placeholders() {
        schema.require_field(placeholder)?;
    }
    tracing::info!(
        backend = backend.kind(),
        note_type = %schema.name,
        fields = schema.field_count(),
        "resolved note type"
    );

    let candidates = backend.find_candidates(&schema, &run.target_field).await?;
    tracing::info!(candidates = candidates.len(), "selected notes with empty {}", run.target_field);

    let mut summary = RunSummary::new(backend.kind(), run.dry_run, candidates.len());
    let mut results = scheduler::run(
        candidates,
        &run.template,
        client,
        run.concurrency,
        run.dry_run,
    )
    .await?;
    results.sort_by_key(|r| r.candidate.note_id);

    for result in results {
        let note_id = result.candidate.note_id;
        match result.outcome {
            Outcome::Planned => summary.planned.push(PlannedNote {
                note_id,
                field: run.preview_field().to_string(),
                preview: result
                    .candidate
                    .preview(run.preview_field(), PREVIEW_WIDTH),
            }),
            Outcome::EmptySource => summary.skipped_empty_source += 1,
            Outcome::Failed(err) => summary.record_failure(note_id, &err),
            Outcome::Generated(content) => {
                let update = FieldUpdate {
                    note_id,
                    field: run.target_field.clone(),
                    content,
                };
                match backend.apply(&schema, &update).await {
                    Ok(true) => summary.updated += 1,
                    Ok(false) => summary.failures.push(FailureRecord {
                        note_id,
                        class: "note-missing",
                        message: "note no longer exists".to_string(),
                    }),
                    Err(err) if err.is_fatal() => return Err(err),
                    Err(err) => {
                        tracing::warn!(note_id, error = %err, "write-back failed");
                        summary.record_failure(note_id, &err);
                    }
                }
            }
        }
    }

    tracing::info!(
        updated = summary.updated,
        failed = summary.skipped_failed(),
        empty_source = summary.skipped_empty_source,
        "run complete"
    );
    Ok(summary)
}

/// Augment a deck package, writing the result to `output`.
///
/// Dry runs read the package and write nothing, so `output` may be `None`.
pub async fn augment_file(
    input: &Path,
    output: Option<&Path>,
    run: &RunConfig,
    client: Option<&GenerationClient>,
) -> Result<RunSummary, AugmentError> {
    if output.is_none() && !run.dry_run {
        return Err(AugmentError::config(
            "an output path is required for a live run",
        ));
    }

    let package = DeckPackage::open(input)?;
    tracing::info!(
        input = %input.display(),
        variant = %package.variant(),
        "opened deck package"
    );

    let pool = db::connect(package.db_path()).await?;
    let backend = FileBackend::new(pool.clone());
    let outcome = augment(&backend, run, client).await;
    pool.close().await;
    let summary = outcome?;

    if let Some(output) = output.filter(|_| !run.dry_run) {
        package.close(output)?;
    }
    Ok(summary)
}

/// Augment notes in a running Anki through AnkiConnect.
pub async fn augment_remote(
    remote: &RemoteConfig,
    run: &RunConfig,
    client: Option<&GenerationClient>,
) -> Result<RunSummary, AugmentError> {
    let rpc = AnkiConnect::new(remote)?;
    let backend = RemoteBackend::new(rpc, remote.batch_size);
    tracing::info!(url = %remote.url, "using AnkiConnect");
    augment(&backend, run, client).await
}
