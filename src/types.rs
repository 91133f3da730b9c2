use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// A post as returned by a subreddit search, before any filtering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePost {
    /// Permanent identifier, also used as the continuation token (Reddit "fullname")
    pub id: String,
    pub title: String,
    pub url: String,
    pub created_utc: DateTime<Utc>,
}

/// A discovered image that passed the content filter and is not yet downloaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateItem {
    pub source_url: String,
    pub suggested_title: String,
    pub creation_timestamp: DateTime<Utc>,
    pub target_path: PathBuf,
}

/// One row of `image_download_history`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadHistoryRecord {
    pub search_term: String,
    pub item_title: String,
    pub source_name: String,
    pub source_url: String,
    pub download_time: DateTime<Utc>,
}

/// Result of a single download task as seen by the coordinator
#[derive(Debug)]
pub struct DownloadOutcome {
    pub item: CandidateItem,
    pub result: Result<u64, crate::error::DownloadError>,
}

impl DownloadOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Summary of one (subreddit, term) harvest run
#[derive(Debug, Default, Clone, Serialize)]
pub struct HarvestReport {
    pub subreddit: String,
    pub search_term: String,
    pub pages: usize,
    pub candidates: usize,
    pub skipped_seen: usize,
    pub submitted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub transient_failures: usize,
    pub history_rows: usize,
    /// Set when a search request after the first page failed and the run stopped early.
    pub listing_error: Option<String>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Image => "jpg",
            MediaKind::Video => "mp4",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaNode {
    pub url: String,
    pub kind: MediaKind,
}

/// A profile post; more than one media node means a carousel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfilePost {
    pub id: String,
    pub permalink: String,
    pub caption: Option<String>,
    pub taken_at: DateTime<Utc>,
    pub media: Vec<MediaNode>,
}

impl ProfilePost {
    pub fn is_carousel(&self) -> bool {
        self.media.len() > 1
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProfilePage {
    /// Newest first
    pub posts: Vec<ProfilePost>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ProfileSyncReport {
    pub profile: String,
    pub posts_seen: usize,
    pub posts_saved: usize,
    pub composites: usize,
    pub failures: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FlairTemplate {
    pub id: String,
    pub text: String,
}

/// Handle to a created submission, enough to reply to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRef {
    /// Fullname, e.g. `t3_abc123`
    pub name: String,
    pub permalink: Option<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct RepostReport {
    pub processed: usize,
    pub posted: usize,
    pub archived: usize,
    pub failed: usize,
    /// Posted, but the caption comment could not be added.
    pub reply_failures: usize,
}
