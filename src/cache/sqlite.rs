//! SQLite cache store.
//!
//! One row per canonical URL. References and kinds are stored as JSON arrays
//! in two columns; a row whose arrays differ in length is reported as
//! [`CacheError::Corrupt`].

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

use super::{CacheEntry, CacheError, CacheStore, CachedMedia};
use crate::acquire::MediaKind;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS downloads (
    url         TEXT PRIMARY KEY,
    refs        TEXT NOT NULL,
    kinds       TEXT NOT NULL,
    title       TEXT NOT NULL DEFAULT '',
    inserted_at INTEGER NOT NULL
);
";

/// Persistent [`CacheStore`] on a single SQLite connection
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database file and ensures the schema
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or the schema applied.
    pub fn open(path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| CacheError::Task(e.to_string()))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        info!(path = %path.display(), "Opened cache database");
        Self::with_connection(conn)
    }

    /// In-memory database, used by tests
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, CacheError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, CacheError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, CacheError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| CacheError::Task("connection mutex poisoned".to_string()))?;
            op(&guard)
        })
        .await
        .map_err(|e| CacheError::Task(e.to_string()))?
    }
}

struct Row {
    url: String,
    refs: String,
    kinds: String,
    title: String,
    inserted_at: i64,
}

fn decode(row: Row) -> Result<CacheEntry, CacheError> {
    let corrupt = |reason: String| CacheError::Corrupt {
        url: row.url.clone(),
        reason,
    };

    let refs: Vec<String> = serde_json::from_str(&row.refs)?;
    let kinds: Vec<String> = serde_json::from_str(&row.kinds)?;
    if refs.len() != kinds.len() {
        return Err(corrupt(format!(
            "{} refs but {} kinds",
            refs.len(),
            kinds.len()
        )));
    }

    let items = refs
        .into_iter()
        .zip(kinds)
        .map(|(reference, kind)| {
            MediaKind::parse(&kind)
                .map(|kind| CachedMedia { reference, kind })
                .ok_or_else(|| corrupt(format!("unknown media kind {kind:?}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let inserted_at: DateTime<Utc> = Utc
        .timestamp_millis_opt(row.inserted_at)
        .single()
        .ok_or_else(|| corrupt(format!("bad timestamp {}", row.inserted_at)))?;

    Ok(CacheEntry {
        url: row.url,
        items,
        title: row.title,
        inserted_at,
    })
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn read(&self, url: &str) -> Result<Option<CacheEntry>, CacheError> {
        let url = url.to_string();
        self.blocking(move |conn| {
            let row = conn
                .query_row(
                    "SELECT url, refs, kinds, title, inserted_at FROM downloads WHERE url = ?1",
                    params![url],
                    |r| {
                        Ok(Row {
                            url: r.get(0)?,
                            refs: r.get(1)?,
                            kinds: r.get(2)?,
                            title: r.get(3)?,
                            inserted_at: r.get(4)?,
                        })
                    },
                )
                .optional()?;
            row.map(decode).transpose()
        })
        .await
    }

    async fn upsert(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let refs = serde_json::to_string(&entry.refs())?;
        let kinds = serde_json::to_string(
            &entry.kinds().iter().map(|k| k.as_str()).collect::<Vec<_>>(),
        )?;
        self.blocking(move |conn| {
            conn.execute(
                "INSERT INTO downloads (url, refs, kinds, title, inserted_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(url) DO UPDATE SET
                    refs = excluded.refs,
                    kinds = excluded.kinds,
                    title = excluded.title,
                    inserted_at = excluded.inserted_at",
                params![
                    entry.url,
                    refs,
                    kinds,
                    entry.title,
                    entry.inserted_at.timestamp_millis()
                ],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, url: &str) -> Result<(), CacheError> {
        let url = url.to_string();
        self.blocking(move |conn| {
            conn.execute("DELETE FROM downloads WHERE url = ?1", params![url])?;
            Ok(())
        })
        .await
    }
}
