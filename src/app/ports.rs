use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWrite;

use crate::error::{DownloadError, Result};
use crate::types::{
    DownloadHistoryRecord, FlairTemplate, ProfilePage, SourcePost, SubmissionRef,
};

// Harvest-side ports
#[async_trait]
pub trait PostSource: Send + Sync {
    /// One page of search results after `continuation`. An empty page ends the listing.
    async fn search(
        &self,
        subreddit: &str,
        term: &str,
        page_size: usize,
        continuation: Option<&str>,
    ) -> Result<Vec<SourcePost>>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn exists(&self, source_url: &str) -> Result<bool>;
    /// Returns false when a row for the URL already existed.
    async fn insert(&self, record: &DownloadHistoryRecord) -> Result<bool>;
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Stream the body of `url` into `sink`, returning the number of bytes written.
    async fn fetch_into(
        &self,
        url: &str,
        sink: &mut (dyn AsyncWrite + Unpin + Send),
    ) -> std::result::Result<u64, DownloadError>;
}

// Profile-sync ports
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn posts_page(
        &self,
        profile: &str,
        page_size: usize,
        cursor: Option<&str>,
    ) -> Result<ProfilePage>;
}

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn last_fetched(&self, profile: &str) -> Result<Option<DateTime<Utc>>>;
    async fn record_fetched(&self, profile: &str, at: DateTime<Utc>) -> Result<()>;
}

pub trait ImageCompositor: Send + Sync {
    /// Paste `inputs` top to bottom into one image written at `output`.
    fn stack_vertically(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;
}

// Repost ports
#[async_trait]
pub trait SubmissionTarget: Send + Sync {
    async fn link_flairs(&self, subreddit: &str) -> Result<Vec<FlairTemplate>>;

    async fn submit_image(
        &self,
        subreddit: &str,
        title: &str,
        image: &Path,
        flair_id: Option<&str>,
    ) -> Result<SubmissionRef>;

    async fn reply(&self, submission: &SubmissionRef, text: &str) -> Result<()>;
}
