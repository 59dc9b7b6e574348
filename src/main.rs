//! # deck-augment CLI
//!
//! Fills empty note fields with generated content, either inside a deck
//! package or in a running Anki through AnkiConnect.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `deck-augment file` | Augment an `.apkg` and write a new package |
//! | `deck-augment remote` | Augment notes through AnkiConnect |
//! | `deck-augment inspect` | List note types, field order and fill counts |
//!
//! ## Examples
//!
//! ```bash
//! # Preview which notes would be augmented
//! deck-augment file --input deck.apkg --note-type Cloze \
//!     --target-field Notes --prompt-file prompt.txt --dry-run
//!
//! # Augment into a new package
//! GEMINI_API_KEY=... deck-augment file --input deck.apkg --output out.apkg \
//!     --note-type Cloze --target-field Notes --prompt-file prompt.txt
//!
//! # Same, against a running Anki
//! deck-augment remote --note-type Cloze --target-field Notes --prompt-file prompt.txt
//! ```
//!
//! Logs go to stderr (`RUST_LOG` overrides the default `info` level); the
//! run summary goes to stdout.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use deck_augment::config::{self, Config};
use deck_augment::generate::{self, GenerationClient};
use deck_augment::inspect;
use deck_augment::pipeline::{self, RunConfig};
use deck_augment::template::PromptTemplate;

/// Fill empty flashcard fields with LLM-generated content.
#[derive(Parser)]
#[command(name = "deck-augment", version)]
struct Cli {
    /// Path to a TOML configuration file. Built-in defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Augment a deck package and write the result to a new file.
    File {
        /// Package to read.
        #[arg(long)]
        input: PathBuf,

        /// Package to write. Required unless `--dry-run`.
        #[arg(long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        job: JobArgs,
    },

    /// Augment notes in a running Anki through AnkiConnect.
    Remote {
        /// AnkiConnect endpoint (overrides `remote.url`).
        #[arg(long)]
        url: Option<String>,

        #[command(flatten)]
        job: JobArgs,
    },

    /// Show note types, their field order and how many notes fill each field.
    Inspect {
        #[arg(long)]
        input: PathBuf,
    },
}

#[derive(Args)]
struct JobArgs {
    /// Note type whose notes are augmented.
    #[arg(long)]
    note_type: String,

    /// Field to fill when empty.
    #[arg(long)]
    target_field: String,

    /// Prompt template; `{Field}` is replaced by the note's field value.
    #[arg(long)]
    prompt_file: PathBuf,

    /// Maximum concurrent generation calls (overrides `augment.concurrency`).
    #[arg(long)]
    concurrency: Option<usize>,

    /// List the notes that would be augmented without generating or writing.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::File {
            input,
            output,
            job,
        } => {
            let run = run_config(&job, &cfg)?;
            let client = generation_client(&cfg, &run)?;
            let summary =
                pipeline::augment_file(&input, output.as_deref(), &run, client.as_ref()).await?;
            println!("{}", summary);
        }
        Commands::Remote { url, job } => {
            if let Some(url) = url {
                cfg.remote.url = url;
            }
            let run = run_config(&job, &cfg)?;
            let client = generation_client(&cfg, &run)?;
            let summary = pipeline::augment_remote(&cfg.remote, &run, client.as_ref()).await?;
            println!("{}", summary);
        }
        Commands::Inspect { input } => {
            let report = inspect::inspect(&input).await?;
            println!("{}", report);
        }
    }

    Ok(())
}

fn run_config(job: &JobArgs, cfg: &Config) -> anyhow::Result<RunConfig> {
    let concurrency = job.concurrency.unwrap_or(cfg.augment.concurrency);
    if concurrency == 0 {
        bail!("--concurrency must be at least 1");
    }

    Ok(RunConfig {
        note_type: job.note_type.clone(),
        target_field: job.target_field.clone(),
        template: read_template(&job.prompt_file)?,
        concurrency,
        dry_run: job.dry_run,
    })
}

fn read_template(path: &Path) -> anyhow::Result<PromptTemplate> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;
    if source.trim().is_empty() {
        bail!("Prompt file is empty: {}", path.display());
    }
    Ok(PromptTemplate::parse(source))
}

/// Dry runs never call the generator, so they need no credentials.
fn generation_client(cfg: &Config, run: &RunConfig) -> anyhow::Result<Option<GenerationClient>> {
    if run.dry_run {
        return Ok(None);
    }
    let generator = generate::create_generator(&cfg.generation)?;
    Ok(Some(GenerationClient::new(generator)))
}
