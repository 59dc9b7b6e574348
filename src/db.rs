use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;

/// Open the extracted collection database.
///
/// The journal mode stays `DELETE` so the file header is left as Anki wrote
/// it, and a single connection serializes write-back.
pub async fn connect(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(false)
        .journal_mode(SqliteJournalMode::Delete)
        .foreign_keys(false)
        // Modern collections declare this collation on name columns.
        .collation("unicase", |a: &str, b: &str| {
            a.to_lowercase().cmp(&b.to_lowercase())
        });

    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}
