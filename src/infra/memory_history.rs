use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::app::ports::{HistoryStore, WatermarkStore};
use crate::error::Result;
use crate::types::DownloadHistoryRecord;

/// In-memory history and watermark store for development/testing
#[derive(Default, Clone)]
pub struct InMemoryHistory {
    rows: Arc<Mutex<Vec<DownloadHistoryRecord>>>,
    watermarks: Arc<Mutex<HashMap<String, Vec<DateTime<Utc>>>>>,
    lookups: Arc<Mutex<Vec<String>>>,
}

impl InMemoryHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with URLs that count as already downloaded.
    pub fn with_seen<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let history = Self::new();
        {
            let mut rows = history.rows.lock().unwrap();
            for url in urls {
                rows.push(DownloadHistoryRecord {
                    search_term: String::new(),
                    item_title: String::new(),
                    source_name: String::new(),
                    source_url: url.into(),
                    download_time: Utc::now(),
                });
            }
        }
        history
    }

    pub fn rows(&self) -> Vec<DownloadHistoryRecord> {
        self.rows.lock().unwrap().clone()
    }

    /// Every URL passed to `exists`, in call order.
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().unwrap().clone()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn exists(&self, source_url: &str) -> Result<bool> {
        self.lookups.lock().unwrap().push(source_url.to_string());
        let rows = self.rows.lock().unwrap();
        Ok(rows.iter().any(|r| r.source_url == source_url))
    }

    async fn insert(&self, record: &DownloadHistoryRecord) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        if rows.iter().any(|r| r.source_url == record.source_url) {
            return Ok(false);
        }
        rows.push(record.clone());
        Ok(true)
    }
}

#[async_trait]
impl WatermarkStore for InMemoryHistory {
    async fn last_fetched(&self, profile: &str) -> Result<Option<DateTime<Utc>>> {
        let marks = self.watermarks.lock().unwrap();
        Ok(marks.get(profile).and_then(|v| v.iter().max().copied()))
    }

    async fn record_fetched(&self, profile: &str, at: DateTime<Utc>) -> Result<()> {
        let mut marks = self.watermarks.lock().unwrap();
        marks.entry(profile.to_string()).or_default().push(at);
        Ok(())
    }
}
