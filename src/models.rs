//! Data types that flow through an augmentation run.
//!
//! A [`Candidate`] is selected fresh on every run, turned into exactly one
//! [`AugmentationResult`] by the scheduler, and the results are folded into
//! a [`RunSummary`] as they are written back.

use std::collections::HashMap;
use std::fmt;

use crate::error::AugmentError;

/// A note whose target field is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub note_id: i64,
    /// Field name → stored value, for every field of the note type.
    pub fields: HashMap<String, String>,
}

impl Candidate {
    /// One-line preview of `field`, newlines flattened, at most `width` chars.
    pub fn preview(&self, field: &str, width: usize) -> String {
        match self.fields.get(field) {
            Some(value) if !value.is_empty() => value
                .replace(['\r', '\n'], " ")
                .chars()
                .take(width)
                .collect(),
            _ => "[Empty]".to_string(),
        }
    }
}

/// What became of one candidate.
#[derive(Debug)]
pub enum Outcome {
    /// Dry run: the candidate would be processed.
    Planned,
    /// Every field the prompt reads is blank, so nothing was generated.
    EmptySource,
    /// Generated field HTML, ready for write-back.
    Generated(String),
    Failed(AugmentError),
}

#[derive(Debug)]
pub struct AugmentationResult {
    pub candidate: Candidate,
    pub outcome: Outcome,
}

/// A per-note failure as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureRecord {
    pub note_id: i64,
    pub class: &'static str,
    pub message: String,
}

/// A dry-run preview line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedNote {
    pub note_id: i64,
    pub field: String,
    pub preview: String,
}

/// Aggregate outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub mode: String,
    pub dry_run: bool,
    pub candidates: usize,
    pub updated: usize,
    pub skipped_empty_source: usize,
    pub failures: Vec<FailureRecord>,
    pub planned: Vec<PlannedNote>,
}

impl RunSummary {
    pub fn new(mode: &str, dry_run: bool, candidates: usize) -> Self {
        Self {
            mode: mode.to_string(),
            dry_run,
            candidates,
            ..Default::default()
        }
    }

    pub fn record_failure(&mut self, note_id: i64, err: &AugmentError) {
        self.failures.push(FailureRecord {
            note_id,
            class: err.class(),
            message: err.to_string(),
        });
    }

    pub fn skipped_failed(&self) -> usize {
        self.failures.len()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dry_run {
            writeln!(f, "augment {} (dry-run)", self.mode)?;
            writeln!(f, "  notes requiring augmentation: {}", self.candidates)?;
            for note in &self.planned {
                writeln!(f, "  ID: {} | {}: {}", note.note_id, note.field, note.preview)?;
            }
            return write!(f, "  dry run complete, no changes made");
        }

        writeln!(f, "augment {}", self.mode)?;
        writeln!(f, "  candidates: {}", self.candidates)?;
        writeln!(f, "  updated: {}", self.updated)?;
        writeln!(f, "  skipped (failed): {}", self.skipped_failed())?;
        write!(f, "  skipped (empty source): {}", self.skipped_empty_source)?;
        if !self.failures.is_empty() {
            write!(f, "\n  failures:")?;
            for failure in &self.failures {
                write!(
                    f,
                    "\n    note {}  {}  {}",
                    failure.note_id, failure.class, failure.message
                )?;
            }
        }
        Ok(())
    }
}
