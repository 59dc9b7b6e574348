//! # deck-augment
//!
//! Fills empty flashcard fields with content from a text-generation
//! service. Notes are read from an Anki deck package (`.apkg`) or from a
//! running Anki through AnkiConnect; both write paths sit behind the
//! [`backend::DeckBackend`] trait and select, generate and report
//! identically.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────┐   ┌───────────┐   ┌────────────┐
//! │ DeckBackend  │──▶│ Candidates │──▶│ Scheduler │──▶│ Write-back │
//! │ file/remote  │   │ (blank     │   │ (bounded  │   │ (serial)   │
//! │ + Schema     │   │  target)   │   │  LLM I/O) │   │            │
//! └──────────────┘   └────────────┘   └───────────┘   └─────┬──────┘
//!                                                           │ file mode
//!                                                           ▼
//!                                                    ┌────────────┐
//!                                                    │ repackage  │
//!                                                    └────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Error taxonomy, fatal vs per-note |
//! | [`package`] | `.apkg` open, variant detection, repackaging |
//! | [`db`] | Collection database connection |
//! | [`schema`] | Note type and field order resolution |
//! | [`models`] | Candidates, results, run summary |
//! | [`markup`] | Markdown → HTML, blank-field test |
//! | [`template`] | Prompt templates |
//! | [`retry`] | Backoff and transient-failure classification |
//! | [`generate`] | Generation providers and client |
//! | [`scheduler`] | Bounded-concurrency generation |
//! | [`backend`] | Write-back contract |
//! | [`backend_file`] | Write-back into an extracted collection |
//! | [`anki_connect`] | AnkiConnect client and remote write-back |
//! | [`pipeline`] | File and remote runs |
//! | [`inspect`] | Deck inspection report |

pub mod anki_connect;
pub mod backend;
pub mod backend_file;
pub mod config;
pub mod db;
pub mod error;
pub mod generate;
pub mod inspect;
pub mod markup;
pub mod models;
pub mod package;
pub mod pipeline;
pub mod retry;
pub mod scheduler;
pub mod schema;
pub mod template;
