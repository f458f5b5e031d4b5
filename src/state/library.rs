use async_trait::async_trait;
use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::data::PhotoRecord;
use crate::error::{CatalogError, Result};

/// Read/write contract of the local photo cache.
///
/// The store is the single source of truth. Implementations must apply
/// `upsert_all` and `set_favorite` atomically: a concurrent reader sees the
/// state before or after the write, never part of it.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    /// Insert new ids as given; for known ids replace the remote-owned
    /// fields and keep the stored favorite flag.
    async fn upsert_all(&self, records: &[PhotoRecord]) -> Result<()>;

    /// Every record, in insertion order
    async fn all(&self) -> Result<Vec<PhotoRecord>>;

    async fn favorites_only(&self) -> Result<Vec<PhotoRecord>>;

    /// Case-insensitive substring match on author, substring match on id.
    /// An empty query matches nothing.
    async fn search(&self, query: &str) -> Result<Vec<PhotoRecord>>;

    /// Fails with `NotFound` when the id is unknown
    async fn set_favorite(&self, id: &str, value: bool) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<PhotoRecord>>;

    async fn count(&self) -> Result<usize>;
}

const SELECT_COLUMNS: &str = "SELECT id, author, download_url, isFavorite FROM photos";

/// The PhotoLibrary manages the SQLite photo cache.
///
/// A single connection sits behind a mutex, which serializes writers and
/// readers alike. Every query runs on tokio's blocking pool.
#[derive(Clone)]
pub struct PhotoLibrary {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl PhotoLibrary {
    /// Open or create the cache at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CatalogError::storage("open", format!("{}: {}", parent.display(), e))
                })?;
            }
        }

        let conn = Connection::open(&db_path)?;
        tracing::info!(path = %db_path.display(), "📁 Photo cache opened");

        let library = PhotoLibrary {
            conn: Arc::new(Mutex::new(conn)),
            db_path: Some(db_path),
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Private in-memory cache, gone when the last clone is dropped
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let library = PhotoLibrary {
            conn: Arc::new(Mutex::new(conn)),
            db_path: None,
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Path to the database file (`None` for in-memory caches)
    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Schema version 1. There are no migrations.
    fn init_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| CatalogError::storage("init_schema", "connection mutex poisoned"))?;

        // rowid is kept (no WITHOUT ROWID) so scans can follow insertion order
        conn.execute(
            "CREATE TABLE IF NOT EXISTS photos (
                id              TEXT PRIMARY KEY NOT NULL,
                author          TEXT NOT NULL,
                download_url    TEXT NOT NULL,
                isFavorite      INTEGER NOT NULL DEFAULT 0
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_photos_favorite ON photos(isFavorite)",
            [],
        )?;

        tracing::debug!("✅ Photo cache schema initialized");
        Ok(())
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let outcome = tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| CatalogError::storage(operation, "connection mutex poisoned"))?;
            f(&mut *guard).map_err(|e| CatalogError::storage(operation, e.to_string()))
        })
        .await
        .map_err(|e| CatalogError::storage(operation, e.to_string()))?;

        if let Err(err) = &outcome {
            tracing::error!(operation, error = %err, "photo cache operation failed");
        }
        outcome
    }
}

fn photo_from_row(row: &Row<'_>) -> rusqlite::Result<PhotoRecord> {
    Ok(PhotoRecord {
        id: row.get(0)?,
        author: row.get(1)?,
        download_url: row.get(2)?,
        is_favorite: row.get(3)?,
    })
}

fn query_photos(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> rusqlite::Result<Vec<PhotoRecord>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let photo_iter = stmt.query_map(params, photo_from_row)?;

    let mut photos = Vec::new();
    for photo in photo_iter {
        photos.push(photo?);
    }
    Ok(photos)
}

/// `%query%` with LIKE wildcards escaped so they match literally
fn like_pattern(query: &str) -> String {
    let mut pattern = String::with_capacity(query.len() + 2);
    pattern.push('%');
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[async_trait]
impl PhotoStore for PhotoLibrary {
    async fn upsert_all(&self, records: &[PhotoRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let records = records.to_vec();
        let written = records.len();

        self.with_conn("upsert_all", move |conn| {
            let tx = conn.transaction()?;
            {
                // The favorite flag is only written for ids seen for the first time
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO photos (id, author, download_url, isFavorite)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(id) DO UPDATE SET
                         author = excluded.author,
                         download_url = excluded.download_url",
                )?;
                for photo in &records {
                    stmt.execute(params![
                        photo.id,
                        photo.author,
                        photo.download_url,
                        photo.is_favorite
                    ])?;
                }
            }
            tx.commit()
        })
        .await?;

        tracing::debug!(count = written, "merged photos into cache");
        Ok(())
    }

    async fn all(&self) -> Result<Vec<PhotoRecord>> {
        self.with_conn("all", |conn| {
            query_photos(conn, &format!("{SELECT_COLUMNS} ORDER BY rowid"), [])
        })
        .await
    }

    async fn favorites_only(&self) -> Result<Vec<PhotoRecord>> {
        self.with_conn("favorites_only", |conn| {
            query_photos(
                conn,
                &format!("{SELECT_COLUMNS} WHERE isFavorite = 1 ORDER BY rowid"),
                [],
            )
        })
        .await
    }

    async fn search(&self, query: &str) -> Result<Vec<PhotoRecord>> {
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let pattern = like_pattern(query);

        self.with_conn("search", move |conn| {
            query_photos(
                conn,
                &format!(
                    r"{SELECT_COLUMNS}
                      WHERE author LIKE ?1 ESCAPE '\' OR id LIKE ?1 ESCAPE '\'
                      ORDER BY rowid"
                ),
                params![pattern],
            )
        })
        .await
    }

    async fn set_favorite(&self, id: &str, value: bool) -> Result<()> {
        let owned_id = id.to_string();
        let changed = self
            .with_conn("set_favorite", move |conn| {
                conn.execute(
                    "UPDATE photos SET isFavorite = ?1 WHERE id = ?2",
                    params![value, owned_id],
                )
            })
            .await?;

        if changed == 0 {
            return Err(CatalogError::not_found(id));
        }
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<PhotoRecord>> {
        let id = id.to_string();
        self.with_conn("get", move |conn| {
            let mut photos = query_photos(
                conn,
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
            )?;
            Ok(photos.pop())
        })
        .await
    }

    async fn count(&self) -> Result<usize> {
        self.with_conn("count", |conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM photos", [], |row| row.get(0))?;
            Ok(count.max(0) as usize)
        })
        .await
    }
}

// Implement Debug for better error messages
impl std::fmt::Debug for PhotoLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhotoLibrary")
            .field("db_path", &self.db_path)
            .finish()
    }
}
