use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::app::ports::{HistoryStore, WatermarkStore};
use crate::error::{HarvestError, Result};
use crate::types::DownloadHistoryRecord;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS image_download_history (
        id              INTEGER PRIMARY KEY AUTOINCREMENT,
        search_term     TEXT NOT NULL,
        post_title      TEXT NOT NULL,
        subreddit_name  TEXT NOT NULL,
        post_url        TEXT NOT NULL UNIQUE,
        download_time   TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS insta_to_reddit_last_fetched (
        id            INTEGER PRIMARY KEY AUTOINCREMENT,
        profile_name  TEXT NOT NULL,
        last_fetched  INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_last_fetched_profile
        ON insta_to_reddit_last_fetched (profile_name, last_fetched);
"#;

/// SQLite-backed download history and profile watermarks.
///
/// Statements run on the blocking pool; the single connection is the
/// single writer.
#[derive(Clone)]
pub struct HistoryDb {
    conn: Arc<Mutex<Connection>>,
}

impl HistoryDb {
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        debug!("History schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| HarvestError::Api {
                message: "history connection mutex poisoned".into(),
            })?;
            f(&guard).map_err(HarvestError::from)
        })
        .await
        .map_err(|e| HarvestError::Api {
            message: format!("history task failed: {e}"),
        })?
    }
}

#[async_trait]
impl HistoryStore for HistoryDb {
    async fn exists(&self, source_url: &str) -> Result<bool> {
        let url = source_url.to_string();
        self.with_conn(move |conn| {
            conn.prepare_cached("SELECT 1 FROM image_download_history WHERE post_url = ?1 LIMIT 1")?
                .exists(params![url])
        })
        .await
    }

    async fn insert(&self, record: &DownloadHistoryRecord) -> Result<bool> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO image_download_history
                    (search_term, post_title, subreddit_name, post_url, download_time)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    record.search_term,
                    record.item_title,
                    record.source_name,
                    record.source_url,
                    record.download_time.to_rfc3339(),
                ],
            )?;
            Ok(changed == 1)
        })
        .await
    }
}

#[async_trait]
impl WatermarkStore for HistoryDb {
    async fn last_fetched(&self, profile: &str) -> Result<Option<DateTime<Utc>>> {
        let profile = profile.to_string();
        let ts: Option<i64> = self
            .with_conn(move |conn| {
                conn.query_row(
                    "SELECT last_fetched FROM insta_to_reddit_last_fetched
                     WHERE profile_name = ?1 ORDER BY last_fetched DESC LIMIT 1",
                    params![profile],
                    |row| row.get(0),
                )
                .optional()
            })
            .await?;
        Ok(ts.and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)))
    }

    async fn record_fetched(&self, profile: &str, at: DateTime<Utc>) -> Result<()> {
        let profile = profile.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO insta_to_reddit_last_fetched (profile_name, last_fetched) VALUES (?1, ?2)",
                params![profile, at.timestamp()],
            )
            .map(|_| ())
        })
        .await
    }
}
