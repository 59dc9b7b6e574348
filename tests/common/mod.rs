//! Fixture decks and generators shared by the integration tests.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deck_augment::error::AugmentError;
use deck_augment::generate::TextGenerator;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const CLOZE_ID: i64 = 1_700_000_000_001;
pub const LAPIS_ID: i64 = 1_700_000_000_002;
pub const CLOZE_FIELDS: [&str; 4] = ["Text", "Frequency", "Notes", "Image"];
pub const LAPIS_FIELDS: [&str; 3] = ["Expression", "ExpressionReading", "Mnemonic"];

pub const MEDIA_MANIFEST: &[u8] = br#"{"0": "cat.png", "1": "dog.mp3"}"#;
pub const MEDIA_0: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 13, 1, 2, 3];
pub const MEDIA_1: &[u8] = &[b'I', b'D', b'3', 4, 0, 0, 0, 0, 0, 0, 0xff, 0xfb, 0x90, 0x64];

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `collection.anki21b` (zstd) plus a placeholder `collection.anki2`.
    Modern,
    /// `collection.anki2` with note types in `col.models`.
    Legacy,
    /// Uncompressed `collection.anki21` plus a placeholder `collection.anki2`.
    Anki21,
}

pub struct NoteSpec {
    pub id: i64,
    pub mid: i64,
    pub fields: Vec<String>,
}

pub fn cloze(id: i64, text: &str, notes: &str) -> NoteSpec {
    NoteSpec {
        id,
        mid: CLOZE_ID,
        fields: vec![text.into(), "12".into(), notes.into(), String::new()],
    }
}

pub fn lapis(id: i64, expression: &str, mnemonic: &str) -> NoteSpec {
    NoteSpec {
        id,
        mid: LAPIS_ID,
        fields: vec![expression.into(), String::new(), mnemonic.into()],
    }
}

fn note_types() -> Vec<(i64, &'static str, Vec<&'static str>)> {
    vec![
        (CLOZE_ID, "Cloze", CLOZE_FIELDS.to_vec()),
        (LAPIS_ID, "Lapis", LAPIS_FIELDS.to_vec()),
    ]
}

/// Build a collection database at `path`.
pub async fn build_collection(path: &Path, layout: Layout, notes: &[NoteSpec]) {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Delete)
        .collation("unicase", |a: &str, b: &str| {
            a.to_lowercase().cmp(&b.to_lowercase())
        });
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .unwrap();

    let mut statements = vec![
        "CREATE TABLE col (id integer primary key, crt integer not null, mod integer not null, \
         scm integer not null, ver integer not null, dty integer not null, usn integer not null, \
         ls integer not null, conf text not null, models text not null, decks text not null, \
         dconf text not null, tags text not null)",
        "CREATE TABLE notes (id integer primary key, guid text not null, mid integer not null, \
         mod integer not null, usn integer not null, tags text not null, flds text not null, \
         sfld integer not null, csum integer not null, flags integer not null, data text not null)",
    ];
    if layout == Layout::Modern {
        statements.push(
            "CREATE TABLE notetypes (id integer not null primary key, name text not null COLLATE unicase, \
             mtime_secs integer not null, usn integer not null, config blob not null)",
        );
        statements.push(
            "CREATE TABLE fields (ntid integer not null, ord integer not null, \
             name text not null COLLATE unicase, config blob not null, primary key (ntid, ord)) without rowid",
        );
    }
    for sql in statements {
        sqlx::query(sql).execute(&pool).await.unwrap();
    }

    let models = match layout {
        Layout::Modern => String::new(),
        Layout::Legacy | Layout::Anki21 => legacy_models_json(),
    };
    sqlx::query(
        "INSERT INTO col VALUES (1, 1600000000, 0, 0, 11, 0, 0, 0, '{}', ?, '{}', '{}', '{}')",
    )
    .bind(models)
    .execute(&pool)
    .await
    .unwrap();

    if layout == Layout::Modern {
        for (id, name, fields) in note_types() {
            sqlx::query("INSERT INTO notetypes VALUES (?, ?, 0, 0, x'')")
                .bind(id)
                .bind(name)
                .execute(&pool)
                .await
                .unwrap();
            // Inserted in reverse to prove ordering comes from `ord`.
            for (ord, field) in fields.iter().enumerate().rev() {
                sqlx::query("INSERT INTO fields VALUES (?, ?, ?, x'')")
                    .bind(id)
                    .bind(ord as i64)
                    .bind(*field)
                    .execute(&pool)
                    .await
                    .unwrap();
            }
        }
    }

    for note in notes {
        sqlx::query(
            "INSERT INTO notes VALUES (?, ?, ?, 0, -1, '', ?, ?, 0, 0, '')",
        )
        .bind(note.id)
        .bind(format!("guid{}", note.id))
        .bind(note.mid)
        .bind(note.fields.join("\x1f"))
        .bind(note.fields.first().cloned().unwrap_or_default())
        .execute(&pool)
        .await
        .unwrap();
    }

    pool.close().await;
}

fn legacy_models_json() -> String {
    let models: serde_json::Map<String, serde_json::Value> = note_types()
        .into_iter()
        .map(|(id, name, fields)| {
            let flds: Vec<_> = fields
                .iter()
                .enumerate()
                .rev()
                .map(|(ord, f)| serde_json::json!({ "name": f, "ord": ord }))
                .collect();
            (
                id.to_string(),
                serde_json::json!({ "id": id, "name": name, "flds": flds }),
            )
        })
        .collect();
    serde_json::Value::Object(models).to_string()
}

/// Build a complete `.apkg` at `dir/name` and return its path.
pub async fn build_deck(dir: &Path, name: &str, layout: Layout, notes: &[NoteSpec]) -> PathBuf {
    let db_path = dir.join(format!("{}.src.db", name));
    build_collection(&db_path, layout, notes).await;
    let db = std::fs::read(&db_path).unwrap();

    let mut entries: Vec<(&str, Vec<u8>, CompressionMethod)> = Vec::new();
    match layout {
        Layout::Modern => {
            entries.push((
                "collection.anki2",
                b"placeholder collection for old clients".to_vec(),
                CompressionMethod::Deflated,
            ));
            entries.push((
                "collection.anki21b",
                zstd::stream::encode_all(&db[..], 0).unwrap(),
                CompressionMethod::Stored,
            ));
        }
        Layout::Legacy => {
            entries.push(("collection.anki2", db, CompressionMethod::Deflated));
        }
        Layout::Anki21 => {
            entries.push((
                "collection.anki2",
                b"placeholder collection for old clients".to_vec(),
                CompressionMethod::Deflated,
            ));
            entries.push(("collection.anki21", db, CompressionMethod::Deflated));
        }
    }
    entries.push(("media", MEDIA_MANIFEST.to_vec(), CompressionMethod::Deflated));
    entries.push(("0", MEDIA_0.to_vec(), CompressionMethod::Stored));
    entries.push(("1", MEDIA_1.to_vec(), CompressionMethod::Deflated));

    let path = dir.join(name);
    write_zip(&path, &entries);
    path
}

pub fn write_zip(path: &Path, entries: &[(&str, Vec<u8>, CompressionMethod)]) {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    for (name, data, method) in entries {
        zip.start_file(*name, SimpleFileOptions::default().compression_method(*method))
            .unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

/// Entry name → (method, crc32, raw stored bytes).
pub fn raw_entries(path: &Path) -> BTreeMap<String, (CompressionMethod, u32, Vec<u8>)> {
    let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut out = BTreeMap::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index_raw(i).unwrap();
        let name = entry.name().to_string();
        let method = entry.compression();
        let crc = entry.crc32();
        let mut raw = Vec::new();
        entry.read_to_end(&mut raw).unwrap();
        out.insert(name, (method, crc, raw));
    }
    out
}

/// Decode the collection database of `apkg` into `dir` and return its path.
pub fn extract_collection(apkg: &Path, dir: &Path) -> PathBuf {
    let mut archive = ZipArchive::new(File::open(apkg).unwrap()).unwrap();
    let names: Vec<String> = archive.file_names().map(str::to_owned).collect();
    let out_path = dir.join(format!(
        "{}.check.db",
        apkg.file_name().unwrap().to_string_lossy()
    ));
    let mut out = File::create(&out_path).unwrap();

    if names.iter().any(|n| n == "collection.anki21b") {
        let mut entry = archive.by_name("collection.anki21b").unwrap();
        zstd::stream::copy_decode(&mut entry, &mut out).unwrap();
    } else {
        let name = if names.iter().any(|n| n == "collection.anki21") {
            "collection.anki21"
        } else {
            "collection.anki2"
        };
        let mut entry = archive.by_name(name).unwrap();
        std::io::copy(&mut entry, &mut out).unwrap();
    }
    out_path
}

/// Stored fields of every note, keyed by id.
pub async fn read_notes(db_path: &Path) -> BTreeMap<i64, (Vec<String>, i64)> {
    let pool = deck_augment::db::connect(db_path).await.unwrap();
    let rows: Vec<(i64, String, i64)> = sqlx::query_as("SELECT id, flds, mod FROM notes")
        .fetch_all(&pool)
        .await
        .unwrap();
    pool.close().await;
    rows.into_iter()
        .map(|(id, flds, modified)| {
            (
                id,
                (flds.split('\x1f').map(str::to_string).collect(), modified),
            )
        })
        .collect()
}

/// Wraps the prompt in bold; fails on prompts containing `FAIL`.
///
/// Tracks call count and the peak number of concurrent calls.
#[derive(Default)]
pub struct ScriptedGenerator {
    pub calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    pub delay_ms: u64,
}

impl ScriptedGenerator {
    pub fn with_delay(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &str) -> Result<String, AugmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        } else {
            tokio::task::yield_now().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if prompt.contains("FAIL") {
            return Err(AugmentError::GenerationService {
                reason: "HTTP 400: invalid argument".to_string(),
                attempts: 1,
            });
        }
        Ok(format!("**{}**", prompt))
    }
}
