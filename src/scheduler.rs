//! Bounded-concurrency dispatch of candidates to the generation client.
//!
//! Each candidate yields exactly one [`AugmentationResult`]. At most `limit`
//! generation calls are in flight at any time; completion order is
//! unspecified. Write-back happens afterwards, serially, in the caller.

use futures::stream::{self, StreamExt};

use crate::error::AugmentError;
use crate::generate::GenerationClient;
use crate::markup;
use crate::models::{AugmentationResult, Candidate, Outcome};
use crate::template::PromptTemplate;

/// Turn every candidate into a result.
///
/// A dry run never touches `client` and marks every candidate
/// [`Outcome::Planned`]. A live run without a client is a configuration
/// error.
pub async fn run(
    candidates: Vec<Candidate>,
    template: &PromptTemplate,
    client: Option<&GenerationClient>,
    limit: usize,
    dry_run: bool,
) -> Result<Vec<AugmentationResult>, AugmentError> {
    if dry_run {
        return Ok(candidates
            .into_iter()
            .map(|candidate| AugmentationResult {
                candidate,
                outcome: Outcome::Planned,
            })
            .collect());
    }

    let client =
        client.ok_or_else(|| AugmentError::config("live run requires a generation client"))?;
    let limit = limit.max(1);
    tracing::info!(
        candidates = candidates.len(),
        concurrency = limit,
        model = client.model_name(),
        "generating"
    );

    let results = stream::iter(candidates)
        .map(|candidate| async move {
            let outcome = process(client, template, &candidate).await;
            AugmentationResult { candidate, outcome }
        })
        .buffer_unordered(limit)
        .collect()
        .await;

    Ok(results)
}

async fn process(
    client: &GenerationClient,
    template: &PromptTemplate,
    candidate: &Candidate,
) -> Outcome {
    if sources_blank(template, candidate) {
        tracing::debug!(note_id = candidate.note_id, "source fields empty, skipping");
        return Outcome::EmptySource;
    }

    match client.generate(template, &candidate.fields).await {
        Ok(content) => {
            tracing::debug!(note_id = candidate.note_id, "generated");
            Outcome::Generated(content)
        }
        Err(e) => {
            tracing::warn!(note_id = candidate.note_id, error = %e, "generation failed");
            Outcome::Failed(e)
        }
    }
}

/// True when the template reads fields and all of them are present but blank.
///
/// An absent field is left for rendering to report as `MissingField`.
fn sources_blank(template: &PromptTemplate, candidate: &Candidate) -> bool {
    let placeholders = template.placeholders();
    !placeholders.is_empty()
        && placeholders.iter().all(|name| {
            candidate
                .fields
                .get(name)
                .is_some_and(|value| markup::is_blank(value))
        })
}
