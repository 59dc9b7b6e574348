//! Deck package (`.apkg`) codec.
//!
//! A package is a zip archive holding one collection database plus media
//! blobs (`0`, `1`, ...) and a `media` manifest. Three database entries
//! exist in the wild:
//!
//! | Entry | Variant | Encoding |
//! |-------|---------|----------|
//! | `collection.anki21b` | [`DbVariant::Modern`] | zstd-compressed SQLite |
//! | `collection.anki21` | [`DbVariant::Anki21`] | plain SQLite |
//! | `collection.anki2` | [`DbVariant::Legacy`] | plain SQLite |
//!
//! Modern packages also carry a placeholder `collection.anki2`, so detection
//! prefers the newest entry present.
//!
//! [`DeckPackage::open`] decodes the database into a private scratch
//! directory. [`DeckPackage::close`] re-encodes it into the same variant,
//! raw-copies every other entry (compressed bytes, names and timestamps
//! untouched), and renames a fully written temporary file over the output.
//! The scratch directory is removed when the package is dropped, whichever
//! way the run ends.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::AugmentError;

const SQLITE_HEADER: &[u8; 16] = b"SQLite format 3\0";
const WORKING_DB: &str = "collection_working.db";
const STAGED_DB: &str = "collection_staged";

/// Which collection database a package carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbVariant {
    Legacy,
    Anki21,
    Modern,
}

impl DbVariant {
    /// Detection order, newest first.
    const PREFERENCE: [DbVariant; 3] = [DbVariant::Modern, DbVariant::Anki21, DbVariant::Legacy];

    pub fn entry_name(&self) -> &'static str {
        match self {
            DbVariant::Legacy => "collection.anki2",
            DbVariant::Anki21 => "collection.anki21",
            DbVariant::Modern => "collection.anki21b",
        }
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self, DbVariant::Modern)
    }

    pub fn detect<S: AsRef<str>>(names: &[S]) -> Option<Self> {
        Self::PREFERENCE
            .into_iter()
            .find(|variant| names.iter().any(|n| n.as_ref() == variant.entry_name()))
    }
}

impl std::fmt::Display for DbVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.entry_name())
    }
}

/// An opened package: the source archive plus its decoded database.
#[derive(Debug)]
pub struct DeckPackage {
    source: PathBuf,
    variant: DbVariant,
    db_compression: CompressionMethod,
    db_path: PathBuf,
    scratch: TempDir,
}

impl DeckPackage {
    pub fn open(path: &Path) -> Result<Self, AugmentError> {
        let file = File::open(path).map_err(|e| AugmentError::archive(path, e))?;
        let mut archive = ZipArchive::new(file).map_err(|e| AugmentError::archive(path, e))?;

        let names: Vec<String> = archive.file_names().map(str::to_owned).collect();
        let variant = DbVariant::detect(&names).ok_or_else(|| {
            AugmentError::archive(path, "no collection database entry in archive")
        })?;

        let scratch = tempfile::Builder::new()
            .prefix("deck-augment-")
            .tempdir()?;
        let db_path = scratch.path().join(WORKING_DB);

        let mut entry = archive
            .by_name(variant.entry_name())
            .map_err(|e| AugmentError::archive(path, e))?;
        let db_compression = entry.compression();

        let mut out = File::create(&db_path)?;
        if variant.is_compressed() {
            zstd::stream::copy_decode(&mut entry, &mut out)
                .map_err(|e| AugmentError::archive(path, format!("zstd: {}", e)))?;
        } else {
            io::copy(&mut entry, &mut out).map_err(|e| AugmentError::archive(path, e))?;
        }
        out.sync_all()?;
        drop(out);

        check_sqlite_header(&db_path).map_err(|reason| AugmentError::archive(path, reason))?;

        tracing::debug!(
            archive = %path.display(),
            variant = %variant,
            scratch = %scratch.path().display(),
            "opened deck package"
        );

        Ok(Self {
            source: path.to_path_buf(),
            variant,
            db_compression,
            db_path,
            scratch,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn variant(&self) -> DbVariant {
        self.variant
    }

    /// Path of the decoded, writable collection database.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Write the package to `output` with the working database re-encoded.
    ///
    /// All connections to [`db_path`](Self::db_path) must be closed first.
    pub fn close(self, output: &Path) -> Result<(), AugmentError> {
        let staged = self.scratch.path().join(STAGED_DB);
        self.stage_database(&staged)?;

        let dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".deck-augment-")
            .suffix(".apkg.part")
            .tempfile_in(&dir)
            .map_err(AugmentError::repackaging)?;

        self.write_archive(&staged, tmp.as_file_mut())?;
        tmp.as_file().sync_all().map_err(AugmentError::repackaging)?;
        tmp.persist(output)
            .map_err(|e| AugmentError::repackaging(e.error))?;

        tracing::info!(output = %output.display(), variant = %self.variant, "wrote deck package");
        Ok(())
    }

    fn stage_database(&self, staged: &Path) -> Result<(), AugmentError> {
        let mut src = File::open(&self.db_path).map_err(AugmentError::repackaging)?;
        let mut dst = File::create(staged).map_err(AugmentError::repackaging)?;
        if self.variant.is_compressed() {
            zstd::stream::copy_encode(&mut src, &mut dst, 0)
                .map_err(|e| AugmentError::repackaging(format!("zstd: {}", e)))?;
        } else {
            io::copy(&mut src, &mut dst).map_err(AugmentError::repackaging)?;
        }
        dst.sync_all().map_err(AugmentError::repackaging)
    }

    fn write_archive(&self, staged: &Path, out: &mut File) -> Result<(), AugmentError> {
        let source = File::open(&self.source).map_err(AugmentError::repackaging)?;
        let mut archive = ZipArchive::new(source).map_err(AugmentError::repackaging)?;
        let mut writer = ZipWriter::new(out);

        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i).map_err(AugmentError::repackaging)?;
            if entry.name() != self.variant.entry_name() {
                writer
                    .raw_copy_file(entry)
                    .map_err(AugmentError::repackaging)?;
                continue;
            }
            drop(entry);

            let size = std::fs::metadata(staged)
                .map_err(AugmentError::repackaging)?
                .len();
            let options = SimpleFileOptions::default()
                .compression_method(writable_method(self.db_compression))
                .large_file(size >= u32::MAX as u64);
            writer
                .start_file(self.variant.entry_name(), options)
                .map_err(AugmentError::repackaging)?;
            let mut db = File::open(staged).map_err(AugmentError::repackaging)?;
            io::copy(&mut db, &mut writer).map_err(AugmentError::repackaging)?;
            writer.flush().map_err(AugmentError::repackaging)?;
        }

        writer.finish().map_err(AugmentError::repackaging)?;
        Ok(())
    }
}

/// Keep the original method when it is one we can write.
fn writable_method(method: CompressionMethod) -> CompressionMethod {
    match method {
        CompressionMethod::Stored => CompressionMethod::Stored,
        _ => CompressionMethod::Deflated,
    }
}

fn check_sqlite_header(path: &Path) -> Result<(), String> {
    let mut header = [0u8; 16];
    let mut file = File::open(path).map_err(|e| e.to_string())?;
    match file.read_exact(&mut header) {
        Ok(()) if &header == SQLITE_HEADER => Ok(()),
        Ok(()) => Err("collection entry is not a SQLite database".to_string()),
        Err(_) => Err("collection entry is truncated".to_string()),
    }
}
